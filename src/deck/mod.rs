// src/deck/mod.rs
//! Deck assembly: map insights + rendered charts + theme onto the fixed
//! slide-template policy. Pure construction; file output lives in
//! [`render`].
//!
//! Template policy: title, agenda, insight slides grouped by sub-topic, one
//! slide per rendered chart, sources, closing summary. Thin content yields a
//! shorter deck — never padding slides to reach the target.

pub mod render;

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::charts::ChartSpec;
use crate::summarize::Insight;
use crate::theme::ThemeConfig;

const INSIGHTS_PER_SLIDE: usize = 4;
const CLOSING_TAKEAWAYS: usize = 3;
const SOURCES_SLIDE_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Title,
    Agenda,
    InsightGroup,
    Chart,
    Sources,
    Closing,
}

#[derive(Debug, Clone, Serialize)]
pub struct Slide {
    pub layout: LayoutKind,
    pub title: String,
    pub bullets: Vec<String>,
    /// Web path of the chart image for Chart slides.
    pub chart_path: Option<String>,
    pub order_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deck {
    pub slides: Vec<Slide>,
    pub theme: ThemeConfig,
    pub output_path: Option<PathBuf>,
}

impl Deck {
    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }
}

pub struct DeckAssembler {
    max_slides: usize,
}

impl DeckAssembler {
    pub fn new(max_slides: usize) -> Self {
        Self {
            max_slides: max_slides.max(1),
        }
    }

    pub fn assemble(
        &self,
        topic: &str,
        insights: &[Insight],
        charts: &[ChartSpec],
        theme: ThemeConfig,
    ) -> Deck {
        let rendered_charts: Vec<&ChartSpec> = charts
            .iter()
            .filter(|c| c.rendered_image_ref.is_some())
            .collect();

        let mut groups = group_by_subtopic(insights);

        // Fixed frame first; insight groups absorb whatever room remains.
        let fixed = 2 // title + agenda
            + rendered_charts.len()
            + usize::from(!insights.is_empty()) // sources
            + usize::from(!insights.is_empty()); // closing
        let room = self.max_slides.saturating_sub(fixed);
        if groups.len() > room {
            tracing::debug!(
                dropped = groups.len() - room,
                "trimming insight slides to fit the deck ceiling"
            );
            groups.truncate(room);
        }

        let mut slides = Vec::new();

        slides.push(Slide {
            layout: LayoutKind::Title,
            title: topic.to_string(),
            bullets: vec![
                "Research briefing".to_string(),
                chrono::Utc::now().format("%B %e, %Y").to_string(),
            ],
            chart_path: None,
            order_index: 0,
        });

        let mut agenda: Vec<String> = groups.iter().map(|g| g.title.clone()).collect();
        if !rendered_charts.is_empty() {
            agenda.push("Data highlights".to_string());
        }
        if !insights.is_empty() {
            agenda.push("Sources".to_string());
            agenda.push("Key takeaways".to_string());
        }
        slides.push(Slide {
            layout: LayoutKind::Agenda,
            title: "Agenda".to_string(),
            bullets: agenda,
            chart_path: None,
            order_index: 0,
        });

        for group in &groups {
            slides.push(Slide {
                layout: LayoutKind::InsightGroup,
                title: group.title.clone(),
                bullets: group
                    .insights
                    .iter()
                    .map(|i| i.claim_text.clone())
                    .collect(),
                chart_path: None,
                order_index: 0,
            });
        }

        for chart in &rendered_charts {
            slides.push(Slide {
                layout: LayoutKind::Chart,
                title: chart.caption.clone(),
                bullets: Vec::new(),
                chart_path: chart.rendered_image_ref.clone(),
                order_index: 0,
            });
        }

        if !insights.is_empty() {
            let urls: BTreeSet<&str> = insights
                .iter()
                .flat_map(|i| i.supporting_source_urls.iter().map(String::as_str))
                .collect();
            slides.push(Slide {
                layout: LayoutKind::Sources,
                title: "Sources".to_string(),
                bullets: urls
                    .into_iter()
                    .take(SOURCES_SLIDE_CAP)
                    .map(str::to_string)
                    .collect(),
                chart_path: None,
                order_index: 0,
            });

            slides.push(Slide {
                layout: LayoutKind::Closing,
                title: "Key Takeaways".to_string(),
                bullets: insights
                    .iter()
                    .take(CLOSING_TAKEAWAYS)
                    .map(|i| i.claim_text.clone())
                    .collect(),
                chart_path: None,
                order_index: 0,
            });
        }

        for (idx, slide) in slides.iter_mut().enumerate() {
            slide.order_index = idx;
        }

        Deck {
            slides,
            theme,
            output_path: None,
        }
    }
}

struct InsightGroup<'a> {
    title: String,
    insights: Vec<&'a Insight>,
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "are", "was", "were", "has", "have",
    "had", "will", "would", "their", "there", "about", "into", "over", "more", "than", "between",
    "its", "also", "been", "percent", "billion", "million", "year", "years",
];

/// Rank-ordered chunks of up to `INSIGHTS_PER_SLIDE` claims, each titled by
/// the chunk's most frequent significant word. Deterministic for a given
/// insight list.
fn group_by_subtopic(insights: &[Insight]) -> Vec<InsightGroup<'_>> {
    insights
        .chunks(INSIGHTS_PER_SLIDE)
        .map(|chunk| {
            let keyword = dominant_keyword(chunk);
            InsightGroup {
                title: match keyword {
                    Some(word) => format!("Findings: {word}"),
                    None => "Findings".to_string(),
                },
                insights: chunk.iter().collect(),
            }
        })
        .collect()
}

fn dominant_keyword(chunk: &[Insight]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
    for insight in chunk {
        for word in insight.claim_text.split(|c: char| !c.is_alphanumeric()) {
            let lower = word.to_lowercase();
            if lower.len() < 4 || STOPWORDS.contains(&lower.as_str()) {
                continue;
            }
            if lower.chars().next().is_some_and(|c| c.is_numeric()) {
                continue;
            }
            *counts.entry(lower).or_default() += 1;
        }
    }
    // BTreeMap iteration makes ties resolve alphabetically, not by hash order.
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(word, _)| capitalize(&word))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::{ChartKind, SeriesPoint};

    fn insight(text: &str, rank: f64) -> Insight {
        Insight {
            claim_text: text.to_string(),
            supporting_source_urls: BTreeSet::from(["https://a.test/1".to_string()]),
            rank,
        }
    }

    fn rendered_chart(caption: &str) -> ChartSpec {
        ChartSpec {
            kind: ChartKind::Bar,
            caption: caption.to_string(),
            series: vec![SeriesPoint {
                label: "A".into(),
                value: 1.0,
            }],
            rendered_image_ref: Some(format!("/charts/{caption}.svg")),
        }
    }

    #[test]
    fn full_frame_in_template_order() {
        let insights: Vec<Insight> = (0..6)
            .map(|i| insight(&format!("Quantum claim number {i} about hardware."), 0.9))
            .collect();
        let charts = vec![rendered_chart("growth")];
        let deck =
            DeckAssembler::new(20).assemble("Quantum Computing", &insights, &charts, ThemeConfig::default());

        let layouts: Vec<LayoutKind> = deck.slides.iter().map(|s| s.layout).collect();
        assert_eq!(
            layouts,
            vec![
                LayoutKind::Title,
                LayoutKind::Agenda,
                LayoutKind::InsightGroup,
                LayoutKind::InsightGroup,
                LayoutKind::Chart,
                LayoutKind::Sources,
                LayoutKind::Closing,
            ]
        );
        // order_index mirrors position
        for (i, slide) in deck.slides.iter().enumerate() {
            assert_eq!(slide.order_index, i);
        }
    }

    #[test]
    fn unrendered_charts_get_no_slide() {
        let insights = vec![insight("A claim about satellites.", 0.5)];
        let charts = vec![ChartSpec {
            kind: ChartKind::Line,
            caption: "never rendered".into(),
            series: Vec::new(),
            rendered_image_ref: None,
        }];
        let deck =
            DeckAssembler::new(20).assemble("Satellites", &insights, &charts, ThemeConfig::default());
        assert!(deck.slides.iter().all(|s| s.layout != LayoutKind::Chart));
    }

    #[test]
    fn ceiling_trims_insight_slides_never_pads() {
        let insights: Vec<Insight> = (0..40)
            .map(|i| insight(&format!("Claim {i} about robotics automation."), 0.5))
            .collect();
        let deck = DeckAssembler::new(10).assemble("Robotics", &insights, &[], ThemeConfig::default());
        assert!(deck.slide_count() <= 10);

        let thin = DeckAssembler::new(20).assemble(
            "Robotics",
            &insights[..1],
            &[],
            ThemeConfig::default(),
        );
        // title + agenda + one group + sources + closing, nothing synthetic
        assert_eq!(thin.slide_count(), 5);
    }

    #[test]
    fn empty_insights_still_yield_title_and_agenda() {
        let deck = DeckAssembler::new(20).assemble("Nothing", &[], &[], ThemeConfig::default());
        assert_eq!(deck.slide_count(), 2);
        assert_eq!(deck.slides[0].layout, LayoutKind::Title);
    }
}
