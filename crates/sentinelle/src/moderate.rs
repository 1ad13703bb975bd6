//! `sentinelle moderate` and `sentinelle history`.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use sentinelle_core::models::ModerationRequest;
use sentinelle_core::pipeline::ModerationReport;

use crate::services::Services;

/// Human-readable report: trace, context snapshot, verdict.
pub fn render_report(report: &ModerationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Trace:");
    for step in &report.steps {
        let _ = writeln!(out, "  - {}", step);
    }

    let history = &report.archivist.history;
    let _ = writeln!(out, "\nContext:");
    let _ = writeln!(
        out,
        "  History: {} flags, toxicity score {:.2}",
        history.flags, history.toxicity_score
    );
    for note in &history.notes {
        let _ = writeln!(out, "    note: {}", note);
    }
    for m in &report.archivist.image_similarity.matches {
        let _ = writeln!(out, "  Image: {:.3} {} ({})", m.score, m.label, m.caption);
    }
    for hit in &report.archivist.text_context {
        let _ = writeln!(out, "  KB: {:.3} {}", hit.score, hit.text);
    }

    let v = &report.verdict;
    let _ = writeln!(out, "\nVerdict:");
    let _ = writeln!(out, "  is_gbv: {}", v.is_gbv);
    let _ = writeln!(out, "  severity: {}", v.severity);
    let _ = writeln!(out, "  reason: {}", v.reason);
    if !v.evidence.is_empty() {
        let _ = writeln!(out, "  evidence:");
        for e in &v.evidence {
            let _ = writeln!(out, "    - {}", e);
        }
    }
    if v.degraded {
        let _ = writeln!(out, "  degraded: true");
    }
    out
}

pub async fn run_moderate(
    services: &Services,
    user_id: &str,
    text: Option<String>,
    image: Option<&Path>,
    audio: Option<&Path>,
    json: bool,
) -> Result<()> {
    let request = ModerationRequest {
        user_id: user_id.to_string(),
        text,
        image: read_optional(image)?,
        audio: read_optional(audio)?,
    };

    let report = services.pipeline.run(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

pub async fn run_history(services: &Services, user_id: &str) -> Result<()> {
    services.archivist.ensure_collections().await?;
    let history = services.archivist.retrieve_history(user_id).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|p| std::fs::read(p).with_context(|| format!("Failed to read {}", p.display())))
        .transpose()
}
