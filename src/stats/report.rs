//! Stats report types and terminal formatting.

use serde::Serialize;
use std::fmt;

use crate::cache::CacheStats;
use crate::model::{ClassId, Split};

/// The result of computing dataset statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StatsReport {
    pub images: usize,
    pub annotations: usize,
    /// Images with no annotations at all.
    pub unlabeled_images: usize,
    /// Images whose annotations were edited in this session.
    pub overrides: usize,
    pub splits: Vec<SplitCount>,
    pub classes: Vec<ClassCount>,
    #[serde(skip)]
    pub(crate) caches: Vec<(String, CacheStats)>,
    /// Display-only option for histogram rendering width.
    #[serde(skip)]
    pub(crate) bar_width: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SplitCount {
    pub split: Split,
    pub images: usize,
    pub annotations: usize,
    pub unlabeled: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassCount {
    pub id: ClassId,
    pub name: String,
    pub annotations: usize,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Summary ─────────────────────────────────────┐")?;
        writeln!(f, "  Images:        {:>10}", format_number(self.images))?;
        writeln!(f, "  Annotations:   {:>10}", format_number(self.annotations))?;
        writeln!(
            f,
            "  Unlabeled:     {:>10} ({})",
            format_number(self.unlabeled_images),
            fmt_percent(self.unlabeled_images, self.images)
        )?;
        if self.overrides > 0 {
            writeln!(f, "  Edited:        {:>10}", format_number(self.overrides))?;
        }
        writeln!(f)?;

        writeln!(f, "┌─ Splits ──────────────────────────────────────┐")?;
        for s in &self.splits {
            writeln!(
                f,
                "  {:<6} {:>8} images {:>10} annotations {:>8} unlabeled",
                s.split.as_str(),
                format_number(s.images),
                format_number(s.annotations),
                format_number(s.unlabeled)
            )?;
        }
        writeln!(f)?;

        self.fmt_classes(f)?;

        if !self.caches.is_empty() {
            writeln!(f)?;
            writeln!(f, "┌─ Caches ──────────────────────────────────────┐")?;
            for (name, stats) in &self.caches {
                writeln!(f, "  {:<12} {}", name, stats)?;
            }
        }
        Ok(())
    }
}

impl StatsReport {
    fn fmt_classes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Classes ({}) ─────────────────────────────────┐", self.classes.len())?;
        if self.classes.is_empty() {
            return writeln!(f, "  (no classes)");
        }

        let max = self.classes.iter().map(|c| c.annotations).max().unwrap_or(0);
        for c in &self.classes {
            writeln!(
                f,
                "  {:>3} {:<20} {} {:>8} ({})",
                c.id.index(),
                truncate_label(&c.name, 20),
                render_bar(c.annotations, max, self.bar_width),
                format_number(c.annotations),
                fmt_percent(c.annotations, self.annotations)
            )?;
        }
        Ok(())
    }
}

/// Format a number with thousands separators.
fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Format a percentage, handling zero denominators.
fn fmt_percent(numerator: usize, denominator: usize) -> String {
    if denominator == 0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", (numerator as f64 / denominator as f64) * 100.0)
    }
}

fn render_bar(count: usize, max_count: usize, width: usize) -> String {
    if max_count == 0 || width == 0 {
        return " ".repeat(width);
    }
    let filled = ((count * width) / max_count).min(width);
    "█".repeat(filled) + &"░".repeat(width - filled)
}

fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        return label.to_string();
    }
    let kept: String = label.chars().take(max_len.saturating_sub(1)).collect();
    format!("{}…", kept)
}
