use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lab_timeline_core::{
    build_forms_dashboard, FormEncounter, FormsConfig, ObservationFetch, PanelFilter,
    PanelTimeline, TimelineCache, TimelineConfig,
};
use lab_timeline_fhir::fetch_from_bundle_str;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lab-timeline",
    about = "In bảng kết quả xét nghiệm theo thời gian từ bundle FHIR JSON."
)]
struct Args {
    /// Đường dẫn tới file cấu hình timeline (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// In bảng của mọi panel.
    Panels {
        /// Đường dẫn tới file JSON bundle.
        #[arg(short, long)]
        input: PathBuf,
        /// Chỉ in các panel có uuid này (có thể lặp lại).
        #[arg(long = "panel")]
        panels: Vec<String>,
    },
    /// In bảng của một panel.
    Table {
        #[arg(short, long)]
        input: PathBuf,
        /// Uuid của panel.
        #[arg(long)]
        panel: String,
    },
    /// In ánh xạ tên panel -> uuid.
    Lookup {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// In danh sách biểu mẫu cho dashboard.
    Forms {
        /// Cấu hình biểu mẫu (JSON).
        #[arg(long)]
        forms: PathBuf,
        /// Danh sách encounter đã điền biểu mẫu (JSON).
        #[arg(long)]
        encounters: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => serde_json::from_str::<TimelineConfig>(&read(path)?)
            .with_context(|| format!("Cấu hình không hợp lệ {path:?}"))?,
        None => TimelineConfig::default(),
    };
    let mut cache = TimelineCache::new(config);

    match args.command {
        Command::Panels { input, panels } => {
            let fetch = load_fetch(&input, cache.config())?;
            let filter = (!panels.is_empty()).then(|| PanelFilter::new(panels));
            let result = cache.all_panels(&fetch, filter.as_ref());
            if let Some(err) = &result.error {
                bail!("Không dựng được bảng: {err}");
            }
            for timeline in &result.data {
                print_timeline(timeline);
                println!();
            }
        }
        Command::Table { input, panel } => {
            let fetch = load_fetch(&input, cache.config())?;
            let result = cache.panel(&fetch, &panel);
            if let Some(err) = &result.error {
                bail!("Không dựng được bảng cho panel {panel}: {err}");
            }
            if let Some(timeline) = result.data.timeline() {
                print_timeline(timeline);
            }
        }
        Command::Lookup { input } => {
            let fetch = load_fetch(&input, cache.config())?;
            let result = cache.lookup(&fetch);
            if let Some(err) = &result.error {
                bail!("Không đọc được panel: {err}");
            }
            for (name, uuid) in result.data.iter() {
                println!("{name}\t{uuid}");
            }
        }
        Command::Forms { forms, encounters } => {
            let forms_config: FormsConfig = serde_json::from_str(&read(&forms)?)
                .with_context(|| format!("Cấu hình biểu mẫu không hợp lệ {forms:?}"))?;
            let encounters: Vec<FormEncounter> = serde_json::from_str(&read(&encounters)?)
                .with_context(|| format!("Danh sách encounter không hợp lệ {encounters:?}"))?;

            let rows = build_forms_dashboard(&forms_config, &encounters)?;
            tracing::info!(forms = rows.len(), "forms dashboard built");
            for row in rows {
                println!(
                    "{}\t{}\t{}",
                    row.display,
                    row.completed_count,
                    row.last_completed.as_deref().unwrap_or("--")
                );
            }
        }
    }

    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Không đọc được file {path:?}"))
}

fn load_fetch(path: &Path, config: &TimelineConfig) -> anyhow::Result<ObservationFetch> {
    let fetch = fetch_from_bundle_str(&read(path)?, 0, config);
    tracing::info!(
        path = %path.display(),
        panels = fetch.sorted_obs.len(),
        "bundle loaded"
    );
    Ok(fetch)
}

fn print_timeline(timeline: &PanelTimeline) {
    let axis = &timeline.parsed_time;
    let label_width = timeline
        .row_data
        .names()
        .map(str::len)
        .max()
        .unwrap_or(0)
        .max(timeline.panel_name.len());

    let years: Vec<String> = axis
        .year_columns
        .iter()
        .map(|c| span(&c.year, c.size))
        .collect();
    let days: Vec<String> = axis
        .day_columns
        .iter()
        .map(|c| span(&c.day, c.size))
        .collect();

    println!("{:label_width$} | {}", timeline.panel_name, years.join(" | "));
    println!("{:label_width$} | {}", "", days.join(" | "));
    println!(
        "{:label_width$} | {}",
        "",
        axis.time_columns
            .iter()
            .map(|t| format!("{t:^CELL$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    );

    for row in timeline.row_data.rows() {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| {
                let text = cell
                    .as_ref()
                    .map(|record| record.value.clone().unwrap_or_else(|| "?".to_string()))
                    .unwrap_or_else(|| "-".to_string());
                format!("{text:^CELL$}")
            })
            .collect();
        println!("{:label_width$} | {}", row.name, cells.join(" | "));
    }
}

const CELL: usize = 9;

/// Căn giữa nhãn trên `size` cột giờ.
fn span(label: &str, size: usize) -> String {
    let width = size * CELL + size.saturating_sub(1) * 3;
    format!("{label:^width$}")
}
