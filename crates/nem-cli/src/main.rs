use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use polars::prelude::{CsvWriter, SerWriter};
use tabwriter::TabWriter;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;

use cli::{Cli, Commands};
use nem_core::{
    load_config_from_path, market_offset, CellValue, Dataset, Field, ImputeStrategy,
    PipelineConfig, Region, Resolution, TimeRange,
};
use nem_io::{view_frame, LoadOutcome, OpenNemProvider, StorageManager};
use nem_pipeline::{write_collect_manifest, CollectManifest, CollectOutcome, CollectRequest, Pipeline};
use nem_ts::summarize;

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(err) = run(cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.storage_root = store.clone();
    }

    match &cli.command {
        Commands::Collect {
            region,
            start,
            end,
            resolution,
            strategy,
            require_complete,
            provider_url,
        } => run_collect(
            &config,
            *region,
            parse_range(start, end)?,
            *resolution,
            (*strategy).unwrap_or(config.default_impute_strategy),
            *require_complete,
            provider_url.as_deref(),
        ),
        Commands::Load {
            region,
            start,
            end,
            resolution,
        } => run_load(&config, *region, parse_range(start, end)?, *resolution),
        Commands::Summarize {
            region,
            start,
            end,
            resolution,
            fields,
            include_flagged,
        } => run_summarize(
            &config,
            *region,
            parse_range(start, end)?,
            *resolution,
            fields.as_deref(),
            *include_flagged,
        ),
        Commands::Plot {
            region,
            start,
            end,
            resolution,
            fields,
            out,
        } => run_plot(
            &config,
            *region,
            parse_range(start, end)?,
            *resolution,
            fields.as_deref(),
            out,
        ),
        Commands::Inspect {
            region,
            start,
            end,
            resolution,
            rows,
        } => run_inspect(&config, *region, parse_range(start, end)?, *resolution, *rows),
        Commands::Completions { shell, out } => generate_completions(*shell, out.as_deref()),
    }
}

fn run_collect(
    config: &PipelineConfig,
    region: Region,
    range: TimeRange,
    resolution: Resolution,
    strategy: ImputeStrategy,
    require_complete: bool,
    provider_url: Option<&str>,
) -> Result<()> {
    let provider = match provider_url {
        Some(url) => OpenNemProvider::new(url),
        None => OpenNemProvider::default(),
    };
    info!(%region, %range, %resolution, %strategy, "collecting");
    let pipeline = Pipeline::new(Arc::new(provider), config.clone());
    let request = CollectRequest {
        region,
        range,
        resolution,
        strategy,
    };
    let outcome = pipeline.collect(&request)?;
    print_sub_ranges(&outcome)?;

    let manifest = CollectManifest {
        created_at: Utc::now(),
        region,
        resolution,
        strategy,
        requested: range,
        records: outcome.records.clone(),
    };
    let manifest_path = config.storage_root.join("collect_manifest.json");
    write_collect_manifest(&manifest_path, &manifest)?;

    println!(
        "{} rows persisted ({} ok / {} partial / {} failed sub-ranges); manifest at {}",
        outcome.dataset.len(),
        outcome.succeeded(),
        outcome.partial(),
        outcome.failed(),
        manifest_path.display()
    );

    let unresolved: usize = outcome.records.iter().map(|r| r.unresolved_gaps).sum();
    if require_complete && unresolved > 0 {
        bail!("{unresolved} gaps left unresolved by strategy '{strategy}'");
    }
    Ok(())
}

fn print_sub_ranges(outcome: &CollectOutcome) -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(
        writer,
        "RANGE\tSTATUS\tROWS\tDROPPED\tGAPS\tSUSPECT\tIMPUTED\tUNRESOLVED\tERROR"
    )?;
    for record in &outcome.records {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            record.range,
            record.status.as_str(),
            record.rows,
            record.dropped,
            record.gaps_detected,
            record.suspects_flagged,
            record.imputed,
            record.unresolved_gaps,
            record.error.as_deref().unwrap_or("-")
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn run_load(
    config: &PipelineConfig,
    region: Region,
    range: TimeRange,
    resolution: Resolution,
) -> Result<()> {
    let store = StorageManager::new(config.storage_root.clone(), config.clone());
    match store.load(region, resolution, range)? {
        LoadOutcome::Complete(dataset) => {
            println!(
                "{region} {range}: complete, {} rows ({} gaps, {} imputed, {} suspect)",
                dataset.len(),
                dataset.gap_count(),
                dataset.imputed_count(),
                dataset.suspect_count()
            );
        }
        LoadOutcome::Partial { dataset, missing } => {
            println!(
                "{region} {range}: partial coverage, {} rows stored; missing sub-ranges:",
                dataset.len()
            );
            for hole in &missing {
                println!("  {hole}");
            }
        }
    }
    Ok(())
}

fn run_summarize(
    config: &PipelineConfig,
    region: Region,
    range: TimeRange,
    resolution: Resolution,
    fields: Option<&str>,
    include_flagged: bool,
) -> Result<()> {
    let store = StorageManager::new(config.storage_root.clone(), config.clone());
    let dataset = store.load(region, resolution, range)?.into_dataset();
    let fields = parse_fields(fields, &dataset)?;
    let stats = summarize(&dataset, &fields, include_flagged);

    let mut writer = TabWriter::new(io::stdout());
    writeln!(
        writer,
        "FIELD\tCOUNT\tMEAN\tSTD\tMEDIAN\tMIN\tMAX\tSUM\tMISSING"
    )?;
    for (field, s) in &stats {
        writeln!(
            writer,
            "{}\t{}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{}",
            field, s.count, s.mean, s.std, s.median, s.min, s.max, s.sum, s.missing_count
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn run_plot(
    config: &PipelineConfig,
    region: Region,
    range: TimeRange,
    resolution: Resolution,
    fields: Option<&str>,
    out: &Path,
) -> Result<()> {
    let store = StorageManager::new(config.storage_root.clone(), config.clone());
    let dataset = store.load(region, resolution, range)?.into_dataset();
    let fields = parse_fields(fields, &dataset)?;
    let mut df = view_frame(&dataset, &fields)?;

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file =
        File::create(out).with_context(|| format!("creating plot view '{}'", out.display()))?;
    CsvWriter::new(&mut file)
        .finish(&mut df)
        .context("writing plot view CSV")?;
    println!(
        "wrote plot view for {} field(s), {} rows to {}",
        fields.len(),
        dataset.len(),
        out.display()
    );
    Ok(())
}

fn run_inspect(
    config: &PipelineConfig,
    region: Region,
    range: TimeRange,
    resolution: Resolution,
    rows: usize,
) -> Result<()> {
    let store = StorageManager::new(config.storage_root.clone(), config.clone());
    let outcome = store.load(region, resolution, range)?;
    let dataset = outcome.dataset();

    println!(
        "{} ({}) @ {} | {} | source {} | retrieved {}",
        dataset.region.full_name(),
        dataset.region,
        dataset.resolution,
        dataset.range,
        dataset.source,
        dataset.retrieved_at.format("%Y-%m-%d %H:%M:%SZ")
    );
    println!(
        "{} rows, {} gaps, {} imputed, {} suspect",
        dataset.len(),
        dataset.gap_count(),
        dataset.imputed_count(),
        dataset.suspect_count()
    );
    for hole in outcome.missing() {
        println!("missing: {hole}");
    }

    let fields = dataset.observed_fields();
    let mut writer = TabWriter::new(io::stdout());
    let header: Vec<String> = std::iter::once("TIMESTAMP".to_string())
        .chain(fields.iter().map(|f| f.column_name().to_uppercase()))
        .collect();
    writeln!(writer, "{}", header.join("\t"))?;
    for row in dataset.rows().iter().take(rows) {
        let mut line = vec![row.timestamp.format("%Y-%m-%d %H:%M").to_string()];
        for field in &fields {
            line.push(match row.get(field) {
                Some(cell) => format_cell(cell),
                None => "-".to_string(),
            });
        }
        writeln!(writer, "{}", line.join("\t"))?;
    }
    writer.flush()?;
    println!("(* suspect, + imputed)");
    Ok(())
}

fn format_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Genuine(v) => format!("{v:.1}"),
        CellValue::Suspect(v) => format!("{v:.1}*"),
        CellValue::Imputed { value, .. } => format!("{value:.1}+"),
        CellValue::Missing(reason) => reason.as_str().to_string(),
    }
}

fn generate_completions(shell: Shell, out: Option<&Path>) -> Result<()> {
    let mut cmd = Cli::command();
    if let Some(path) = out {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        generate(shell, &mut cmd, "nem", &mut file);
        println!("Wrote {shell:?} completion to {}", path.display());
    } else {
        let stdout = &mut io::stdout();
        generate(shell, &mut cmd, "nem", stdout);
    }
    Ok(())
}

fn parse_fields(raw: Option<&str>, dataset: &Dataset) -> Result<Vec<Field>> {
    match raw {
        None => Ok(dataset.observed_fields()),
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                Field::from_column_name(name)
                    .ok_or_else(|| anyhow!("unknown field '{name}'"))
            })
            .collect(),
    }
}

fn parse_range(start: &str, end: &str) -> Result<TimeRange> {
    Ok(TimeRange::new(
        parse_market_time(start)?,
        parse_market_time(end)?,
    )?)
}

/// Parse a market-local timestamp: a bare date means midnight.
fn parse_market_time(raw: &str) -> Result<DateTime<FixedOffset>> {
    let naive: NaiveDateTime = if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid time of day"))?
    } else {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .with_context(|| format!("unrecognized timestamp '{raw}'"))?
    };
    naive
        .and_local_timezone(market_offset())
        .single()
        .ok_or_else(|| anyhow!("ambiguous market-local timestamp '{raw}'"))
}
