// src/charts.rs
//! Chart planning: pick insights that carry comparable numbers and turn them
//! into a bounded set of chart specs. Planning is pure and deterministic;
//! drawing happens behind the `ChartRenderer` boundary, and a render failure
//! only ever costs that one chart.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::summarize::Insight;
use crate::theme::ThemeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Pie => "pie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub caption: String,
    pub series: Vec<SeriesPoint>,
    /// Set by the renderer once the image exists.
    pub rendered_image_ref: Option<String>,
}

/// Year followed closely by a figure: "2021: 12" / "in 2021 the market hit 14.2".
fn year_value_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"\b((?:19|20)\d{2})\b[^0-9]{0,30}?(\d+(?:[.,]\d+)*)").expect("year regex")
    })
}

/// The reverse ordering: "grew from 8.1 billion in 2021".
fn value_year_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:[.,]\d+)*)[^0-9]{0,20}?\b((?:19|20)\d{2})\b").expect("value-year regex")
    })
}

/// Labeled percentage: "Vendor A holds 42%" / "solar: 18.5%".
fn label_percent_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([A-Za-z][A-Za-z0-9 .&'\-]{1,28}?)(?:\s+(?:at|with|holds?|has|near|around|of))?\s*:?\s*(\d+(?:\.\d+)?)\s*%")
            .expect("percent regex")
    })
}

/// Explicit "label: value" pairs without a percent sign.
fn label_value_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z][A-Za-z0-9 .&'\-]{2,28}):\s*(\d+(?:[.,]\d+)*)\b")
            .expect("label value regex")
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn dedup_points(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    let mut seen = std::collections::HashSet::new();
    points
        .into_iter()
        .filter(|p| seen.insert(p.label.clone()))
        .collect()
}

/// Extract a chartable series from one claim, or `None` when the claim
/// carries nothing comparable. First matching shape wins: a year series is
/// a line, percentage breakdowns become a pie when they look like a whole
/// (sum ≈ 100) and a bar otherwise, plain labeled values become a bar.
pub fn extract_series(claim_text: &str) -> Option<(ChartKind, Vec<SeriesPoint>)> {
    let mut years = dedup_points(
        year_value_re()
            .captures_iter(claim_text)
            .filter_map(|c| {
                Some(SeriesPoint {
                    label: c[1].to_string(),
                    value: parse_number(&c[2])?,
                })
            })
            .collect(),
    );
    if years.len() < 2 {
        // Claims often lead with the figure: "grew from 10 in 2020 to 90 in 2024".
        let reversed = dedup_points(
            value_year_re()
                .captures_iter(claim_text)
                .filter_map(|c| {
                    Some(SeriesPoint {
                        label: c[2].to_string(),
                        value: parse_number(&c[1])?,
                    })
                })
                .collect(),
        );
        if reversed.len() > years.len() {
            years = reversed;
        }
    }
    if years.len() >= 2 {
        years.sort_by(|a, b| a.label.cmp(&b.label));
        return Some((ChartKind::Line, years));
    }

    let percents: Vec<SeriesPoint> = label_percent_re()
        .captures_iter(claim_text)
        .filter_map(|c| {
            Some(SeriesPoint {
                label: c[1].trim().to_string(),
                value: parse_number(&c[2])?,
            })
        })
        .collect();
    let percents = dedup_points(percents);
    if percents.len() >= 2 {
        let sum: f64 = percents.iter().map(|p| p.value).sum();
        let kind = if (60.0..=140.0).contains(&sum) {
            ChartKind::Pie
        } else {
            ChartKind::Bar
        };
        return Some((kind, percents));
    }

    let labeled: Vec<SeriesPoint> = label_value_re()
        .captures_iter(claim_text)
        .filter_map(|c| {
            Some(SeriesPoint {
                label: c[1].trim().to_string(),
                value: parse_number(&c[2])?,
            })
        })
        .collect();
    let labeled = dedup_points(labeled);
    if labeled.len() >= 2 {
        return Some((ChartKind::Bar, labeled));
    }

    None
}

pub struct ChartPlanner {
    max_charts: usize,
}

impl ChartPlanner {
    pub fn new(max_charts: usize) -> Self {
        Self { max_charts }
    }

    /// At most `max_charts` specs, in insight-rank order, one per eligible
    /// insight. No eligible insight at all is not an error — the deck just
    /// goes text-only.
    pub fn plan(&self, insights: &[Insight]) -> Vec<ChartSpec> {
        let mut specs = Vec::new();
        for insight in insights {
            if specs.len() >= self.max_charts {
                break;
            }
            let Some((kind, series)) = extract_series(&insight.claim_text) else {
                continue;
            };
            specs.push(ChartSpec {
                kind,
                caption: caption_from_claim(&insight.claim_text),
                series,
                rendered_image_ref: None,
            });
        }
        specs
    }
}

fn caption_from_claim(claim: &str) -> String {
    let trimmed = claim.trim().trim_end_matches('.');
    if trimmed.chars().count() <= 80 {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(77).collect();
    format!("{}…", cut.trim_end())
}

/// Chart-drawing collaborator boundary. The shipped implementation writes
/// themed SVG files; swapping in another backend only touches this seam.
pub trait ChartRenderer: Send + Sync {
    fn render(
        &self,
        file_stem: &str,
        spec: &ChartSpec,
        theme: &ThemeConfig,
    ) -> anyhow::Result<PathBuf>;
}

pub struct SvgChartRenderer {
    out_dir: PathBuf,
}

const SVG_W: f64 = 960.0;
const SVG_H: f64 = 540.0;

impl SvgChartRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl ChartRenderer for SvgChartRenderer {
    fn render(
        &self,
        file_stem: &str,
        spec: &ChartSpec,
        theme: &ThemeConfig,
    ) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.out_dir).context("create charts dir")?;
        let path = self.out_dir.join(format!("{file_stem}.svg"));
        let svg = render_svg(spec, theme);
        fs::write(&path, svg).with_context(|| format!("write chart {}", path.display()))?;
        Ok(path)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn series_palette(theme: &ThemeConfig) -> [&str; 3] {
    [
        theme.brand_primary.as_str(),
        theme.brand_secondary.as_str(),
        theme.accent_color.as_str(),
    ]
}

fn render_svg(spec: &ChartSpec, theme: &ThemeConfig) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{SVG_W}" height="{SVG_H}" viewBox="0 0 {SVG_W} {SVG_H}" font-family="{}">"#,
        xml_escape(&theme.font_family)
    ));
    out.push_str(&format!(
        r#"<rect width="{SVG_W}" height="{SVG_H}" fill="{}"/>"#,
        xml_escape(&theme.background_color)
    ));
    out.push_str(&format!(
        r#"<text x="40" y="48" font-size="26" fill="{}">{}</text>"#,
        xml_escape(&theme.brand_primary),
        xml_escape(&spec.caption)
    ));
    match spec.kind {
        ChartKind::Bar => render_bars(&mut out, spec, theme),
        ChartKind::Line => render_line(&mut out, spec, theme),
        ChartKind::Pie => render_pie(&mut out, spec, theme),
    }
    out.push_str("</svg>");
    out
}

fn render_bars(out: &mut String, spec: &ChartSpec, theme: &ThemeConfig) {
    let max = spec.series.iter().map(|p| p.value).fold(f64::MIN, f64::max);
    let max = if max <= 0.0 { 1.0 } else { max };
    let plot_h = SVG_H - 160.0;
    let slot = (SVG_W - 120.0) / spec.series.len() as f64;
    let bar_w = (slot * 0.6).min(120.0);
    for (i, point) in spec.series.iter().enumerate() {
        let h = (point.value / max) * plot_h;
        let x = 60.0 + slot * i as f64 + (slot - bar_w) / 2.0;
        let y = 80.0 + (plot_h - h);
        out.push_str(&format!(
            r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_w:.1}" height="{h:.1}" fill="{}"/>"#,
            xml_escape(&theme.brand_primary)
        ));
        let cx = x + bar_w / 2.0;
        out.push_str(&format!(
            r#"<text x="{cx:.1}" y="{:.1}" font-size="16" text-anchor="middle" fill="{}">{}</text>"#,
            y - 8.0,
            xml_escape(&theme.text_color),
            point.value
        ));
        out.push_str(&format!(
            r#"<text x="{cx:.1}" y="{:.1}" font-size="15" text-anchor="middle" fill="{}">{}</text>"#,
            SVG_H - 48.0,
            xml_escape(&theme.text_color),
            xml_escape(&point.label)
        ));
    }
}

fn render_line(out: &mut String, spec: &ChartSpec, theme: &ThemeConfig) {
    let max = spec.series.iter().map(|p| p.value).fold(f64::MIN, f64::max);
    let max = if max <= 0.0 { 1.0 } else { max };
    let plot_h = SVG_H - 160.0;
    let step = (SVG_W - 160.0) / (spec.series.len().max(2) - 1) as f64;
    let mut points = Vec::with_capacity(spec.series.len());
    for (i, point) in spec.series.iter().enumerate() {
        let x = 80.0 + step * i as f64;
        let y = 80.0 + plot_h * (1.0 - point.value / max);
        points.push(format!("{x:.1},{y:.1}"));
        out.push_str(&format!(
            r#"<circle cx="{x:.1}" cy="{y:.1}" r="6" fill="{}"/>"#,
            xml_escape(&theme.accent_color)
        ));
        out.push_str(&format!(
            r#"<text x="{x:.1}" y="{:.1}" font-size="16" text-anchor="middle" fill="{}">{}</text>"#,
            y - 14.0,
            xml_escape(&theme.text_color),
            point.value
        ));
        out.push_str(&format!(
            r#"<text x="{x:.1}" y="{:.1}" font-size="15" text-anchor="middle" fill="{}">{}</text>"#,
            SVG_H - 48.0,
            xml_escape(&theme.text_color),
            xml_escape(&point.label)
        ));
    }
    out.push_str(&format!(
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="4"/>"#,
        points.join(" "),
        xml_escape(&theme.brand_primary)
    ));
}

fn render_pie(out: &mut String, spec: &ChartSpec, theme: &ThemeConfig) {
    let total: f64 = spec.series.iter().map(|p| p.value).sum();
    let total = if total <= 0.0 { 1.0 } else { total };
    let (cx, cy, r) = (SVG_W / 2.0, (SVG_H + 60.0) / 2.0, 170.0);
    let palette = series_palette(theme);
    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, point) in spec.series.iter().enumerate() {
        let sweep = (point.value / total) * std::f64::consts::TAU;
        let (x0, y0) = (cx + r * angle.cos(), cy + r * angle.sin());
        let end = angle + sweep;
        let (x1, y1) = (cx + r * end.cos(), cy + r * end.sin());
        let large = if sweep > std::f64::consts::PI { 1 } else { 0 };
        out.push_str(&format!(
            r#"<path d="M{cx:.1},{cy:.1} L{x0:.1},{y0:.1} A{r:.1},{r:.1} 0 {large} 1 {x1:.1},{y1:.1} Z" fill="{}"/>"#,
            xml_escape(palette[i % palette.len()])
        ));
        let mid = angle + sweep / 2.0;
        let (lx, ly) = (cx + (r + 40.0) * mid.cos(), cy + (r + 40.0) * mid.sin());
        out.push_str(&format!(
            r#"<text x="{lx:.1}" y="{ly:.1}" font-size="15" text-anchor="middle" fill="{}">{} ({}%)</text>"#,
            xml_escape(&theme.text_color),
            xml_escape(&point.label),
            point.value
        ));
        angle = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn insight(text: &str, rank: f64) -> Insight {
        Insight {
            claim_text: text.to_string(),
            supporting_source_urls: BTreeSet::from(["https://a.test/1".to_string()]),
            rank,
        }
    }

    #[test]
    fn year_series_becomes_a_line_chart() {
        let (kind, series) =
            extract_series("The market grew from 8.1 billion in 2021 to 12.4 billion in 2023.")
                .expect("chartable");
        assert_eq!(kind, ChartKind::Line);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "2021");
        assert_eq!(series[0].value, 8.1);
    }

    #[test]
    fn percent_whole_becomes_a_pie() {
        let (kind, series) =
            extract_series("Vendor A holds 55%, Vendor B 30% and others 15% of the market.")
                .expect("chartable");
        assert_eq!(kind, ChartKind::Pie);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn prose_without_numbers_is_not_chartable() {
        assert!(extract_series("Researchers disagree about the best approach.").is_none());
    }

    #[test]
    fn planning_is_deterministic_and_bounded() {
        let insights = vec![
            insight("Adoption rose from 10 in 2020 to 90 in 2024.", 0.9),
            insight("No numbers here, purely qualitative.", 0.8),
            insight("Vendor A: 120, Vendor B: 80 installations.", 0.7),
            insight("Throughput grew from 5 in 2019 to 50 in 2025.", 0.6),
        ];
        let planner = ChartPlanner::new(2);
        let first = planner.plan(&insights);
        let second = planner.plan(&insights);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].kind, ChartKind::Line);
        assert_eq!(first[1].kind, ChartKind::Bar);
    }

    #[test]
    fn svg_render_writes_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = SvgChartRenderer::new(dir.path());
        let spec = ChartSpec {
            kind: ChartKind::Bar,
            caption: "Vendors & share".into(),
            series: vec![
                SeriesPoint {
                    label: "A".into(),
                    value: 3.0,
                },
                SeriesPoint {
                    label: "B".into(),
                    value: 5.0,
                },
            ],
            rendered_image_ref: None,
        };
        let path = renderer
            .render("job1_chart_0", &spec, &ThemeConfig::default())
            .expect("render");
        let svg = std::fs::read_to_string(path).expect("read svg");
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Vendors &amp; share"));
    }
}
