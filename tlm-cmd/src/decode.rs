use std::fmt::Write as _;
use std::fs::File;
use std::io::{stdout, BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tlm::element::ElementUpdate;
use tlm::source::{self, DEFAULT_CAPACITY};
use tlm::{Catalog, Engine, EngineStatus, MissionConfig};
use tracing::{debug, info, warn};

use crate::info::Format;

pub struct Opts {
    pub symbols: bool,
    pub chunk_size: usize,
    pub minor_frame_idx: Option<usize>,
    pub watch: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    input: String,
    status: EngineStatus,
    elements: Vec<ElementUpdate>,
}

pub fn decode(
    mission: MissionConfig,
    catalog: &Path,
    input: &Path,
    opts: &Opts,
    format: &Format,
) -> Result<()> {
    let catalog = Catalog::from_path(catalog, &mission)
        .with_context(|| format!("loading catalog from {catalog:?}"))?;
    info!("loaded {} elements", catalog.len());

    let frame_length = mission.frame_length;
    let mut engine = if opts.symbols {
        Engine::symbol(mission, catalog)
    } else {
        Engine::discrete(mission, catalog)
    }
    .context("creating engine")?;

    if let Some(idx) = opts.minor_frame_idx {
        engine
            .set_minor_frame_idx(idx)
            .context("setting minor frame index")?;
    }

    let watch: Vec<&str> = opts.watch.iter().map(String::as_str).collect();
    let subscription = if watch.is_empty() {
        None
    } else {
        Some(
            engine
                .handle()
                .subscribe(&watch)
                .context("subscribing to watched elements")?,
        )
    };

    let reader = BufReader::new(File::open(input).context("opening input")?);
    let (buffers, source) = if opts.symbols {
        source::spawn(source::read_symbols(reader, opts.chunk_size), DEFAULT_CAPACITY)
    } else {
        source::spawn(source::read_frames(reader, frame_length), DEFAULT_CAPACITY)
    }
    .context("starting reader")?;

    let mut out = stdout().lock();
    for buffer in &buffers {
        engine.process(&buffer).context("decoding")?;
        if let Some(ref sub) = subscription {
            for update in sub.try_iter() {
                write_update(&mut out, &update, format)?;
            }
        }
    }
    source
        .join()
        .map_err(|_| anyhow!("reader thread panicked"))?
        .context("reading input")?;

    let status = engine.status();
    debug!(?status, "input exhausted");
    if status.sync_resets > 0 {
        warn!("lost synchronization {} times", status.sync_resets);
    }

    let report = Report {
        input: input.to_string_lossy().to_string(),
        status,
        elements: engine.snapshots().collect(),
    };
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, &report).context("serializing to json")?;
            writeln!(out).context("writing to stdout")
        }
        Format::Text => out
            .write_all(render_text(&report).as_bytes())
            .context("writing to stdout"),
    }
}

fn write_update<W: Write>(out: &mut W, update: &ElementUpdate, format: &Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer(&mut *out, update).context("serializing to json")?;
            writeln!(out).context("writing to stdout")
        }
        Format::Text => {
            let time = update.time.map(|t| t.to_rfc3339()).unwrap_or_default();
            let trigger = update
                .trigger
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            writeln!(
                out,
                "{time} {trigger} {}={}{}",
                update.id,
                update.formatted,
                unit(update)
            )
            .context("writing to stdout")
        }
    }
}

fn unit(update: &ElementUpdate) -> String {
    update
        .unit
        .as_ref()
        .map(|u| format!(" {u}"))
        .unwrap_or_default()
}

fn render_text(report: &Report) -> String {
    let status = &report.status;
    let mut s = String::new();
    let _ = writeln!(s, "{}", report.input);
    let _ = writeln!(s, "{}", "=".repeat(79));
    let _ = writeln!(s, "Buffers:      {}", status.buffers);
    let _ = writeln!(s, "Sync:         {}", status.sync_state);
    let _ = writeln!(s, "Frames:       {}", status.complete_frames);
    let _ = writeln!(s, "Sync resets:  {}", status.sync_resets);
    let _ = writeln!(
        s,
        "Minor frame:  {}",
        status
            .frame
            .minor_frame_idx
            .map_or_else(|| "unknown".to_string(), |idx| idx.to_string())
    );
    for subcom in &status.subcoms {
        let _ = writeln!(
            s,
            "Subcom {:<5} {}/{} bytes, {} frames, {} discontinuities",
            subcom.key,
            subcom.fill,
            subcom.length,
            subcom.complete_frames,
            subcom.discontinuities
        );
    }
    let _ = writeln!(s);

    let width = report
        .elements
        .iter()
        .map(|e| e.id.len())
        .max()
        .unwrap_or_default();
    for update in &report.elements {
        let flag = match update.valid {
            Some(false) => " (invalid)",
            _ => "",
        };
        let _ = writeln!(
            s,
            "{:<width$}  {}{}{flag}  [{} updates]",
            update.id,
            update.formatted,
            unit(update),
            update.update_count
        );
    }
    s
}
