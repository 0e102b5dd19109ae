//! Body-type classification, dress sizing and silhouette suggestions.
//!
//! Everything here works in inches. Use [`crate::Measurement::to_inches`]
//! to convert pipeline output first.
//!
//! ```
//! use body_fit::classify::{classify_body_type, dress_size, BodyType};
//!
//! assert_eq!(classify_body_type(36.0, 26.0, 36.0), BodyType::Hourglass);
//! assert_eq!(dress_size(36.5, 28.5, 39.5), 8);
//! ```

use std::fmt;
use std::str::FromStr;

/// Body-shape taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum BodyType {
    Hourglass,
    Pear,
    Apple,
    Rectangle,
    InvertedTriangle,
}

impl BodyType {
    pub const ALL: [BodyType; 5] = [
        BodyType::Hourglass,
        BodyType::Pear,
        BodyType::Apple,
        BodyType::Rectangle,
        BodyType::InvertedTriangle,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BodyType::Hourglass => "hourglass",
            BodyType::Pear => "pear",
            BodyType::Apple => "apple",
            BodyType::Rectangle => "rectangle",
            BodyType::InvertedTriangle => "inverted_triangle",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            BodyType::Hourglass => {
                "Bust and hips are balanced with a well-defined waist, a classic hourglass figure."
            }
            BodyType::Pear => "Hips are fuller than the bust, a pear-shaped silhouette.",
            BodyType::Apple => {
                "Weight is carried around the midsection with slimmer hips and legs, an apple shape."
            }
            BodyType::Rectangle => {
                "Bust, waist and hips are similar in measurement, a balanced athletic figure."
            }
            BodyType::InvertedTriangle => {
                "Shoulders and bust are broader than the hips, an inverted triangle shape."
            }
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BodyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        BodyType::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| format!("unknown body type: {s}"))
    }
}

/// Classify from bust, waist and hip circumferences.
///
/// Rules, first match wins:
/// - hourglass: bust/hips in [0.9, 1.1] and waist/bust below 0.8
/// - pear: bust/hips below 0.9
/// - inverted triangle: bust/hips above 1.1
/// - apple: bust/hips above 1.0 and waist/bust at least 0.8
/// - rectangle otherwise
///
/// Only ratios matter, so any consistent unit works. Non-positive hips or
/// bust give [`BodyType::Rectangle`].
pub fn classify_body_type(bust: f64, waist: f64, hips: f64) -> BodyType {
    if hips <= 0.0 || bust <= 0.0 {
        return BodyType::Rectangle;
    }
    let bust_hip = bust / hips;
    let waist_bust = waist / bust;

    if (0.9..=1.1).contains(&bust_hip) && waist_bust < 0.8 {
        BodyType::Hourglass
    } else if bust_hip < 0.9 {
        BodyType::Pear
    } else if bust_hip > 1.1 {
        BodyType::InvertedTriangle
    } else if bust_hip > 1.0 && waist_bust >= 0.8 {
        BodyType::Apple
    } else {
        BodyType::Rectangle
    }
}

/// One row of the size chart, maximum measurements in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct SizeRow {
    pub size: u8,
    pub bust: f64,
    pub waist: f64,
    pub hips: f64,
}

const fn row(size: u8, bust: f64, waist: f64, hips: f64) -> SizeRow {
    SizeRow {
        size,
        bust,
        waist,
        hips,
    }
}

/// US bridal size chart, smallest first.
pub const SIZE_CHART: [SizeRow; 13] = [
    row(0, 32.5, 24.5, 35.5),
    row(2, 33.5, 25.5, 36.5),
    row(4, 34.5, 26.5, 37.5),
    row(6, 35.5, 27.5, 38.5),
    row(8, 36.5, 28.5, 39.5),
    row(10, 37.5, 29.5, 40.5),
    row(12, 39.0, 31.0, 42.0),
    row(14, 41.0, 33.0, 44.0),
    row(16, 43.0, 35.0, 46.0),
    row(18, 45.0, 37.0, 48.0),
    row(20, 47.0, 39.0, 50.0),
    row(22, 49.0, 41.0, 52.0),
    row(24, 51.0, 43.0, 54.0),
];

pub const MAX_SIZE: u8 = 24;

/// First chart row no measurement exceeds; the largest size otherwise.
pub fn dress_size(bust: f64, waist: f64, hips: f64) -> u8 {
    SIZE_CHART
        .iter()
        .find(|r| bust <= r.bust && waist <= r.waist && hips <= r.hips)
        .map_or(MAX_SIZE, |r| r.size)
}

/// Sizes two either side of `size`, within the chart.
pub fn size_range(size: u8) -> (u8, u8) {
    (size.saturating_sub(2), size.saturating_add(2).min(MAX_SIZE))
}

/// Dress silhouettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "kebab-case"))]
pub enum Silhouette {
    Ballgown,
    ALine,
    Mermaid,
    Sheath,
    Empire,
    FitAndFlare,
    Bohemian,
}

impl Silhouette {
    pub const ALL: [Silhouette; 7] = [
        Silhouette::Ballgown,
        Silhouette::ALine,
        Silhouette::Mermaid,
        Silhouette::Sheath,
        Silhouette::Empire,
        Silhouette::FitAndFlare,
        Silhouette::Bohemian,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Silhouette::Ballgown => "ballgown",
            Silhouette::ALine => "a-line",
            Silhouette::Mermaid => "mermaid",
            Silhouette::Sheath => "sheath",
            Silhouette::Empire => "empire",
            Silhouette::FitAndFlare => "fit-and-flare",
            Silhouette::Bohemian => "bohemian",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Silhouette::Ballgown => "Full, voluminous skirt with a fitted bodice",
            Silhouette::ALine => "Fitted at the hips and gradually flaring out",
            Silhouette::Mermaid => "Fitted through the hips and flaring at the knee",
            Silhouette::Sheath => "Slim and form-fitting throughout",
            Silhouette::Empire => "High waistline just below the bust with a flowing skirt",
            Silhouette::FitAndFlare => "Fitted bodice with a skirt that flares at the waist",
            Silhouette::Bohemian => "Relaxed, flowy fit with romantic details",
        }
    }
}

impl fmt::Display for Silhouette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scored silhouette suggestion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct Recommendation {
    pub silhouette: Silhouette,
    /// In [0, 1].
    pub score: f64,
    pub reason: &'static str,
}

const fn rec(silhouette: Silhouette, score: f64, reason: &'static str) -> Recommendation {
    Recommendation {
        silhouette,
        score,
        reason,
    }
}

fn recommendations(body_type: BodyType) -> &'static [Recommendation; 5] {
    use Silhouette::*;

    const HOURGLASS: [Recommendation; 5] = [
        rec(Mermaid, 0.95, "Showcases natural curves"),
        rec(Sheath, 0.90, "Follows the figure closely"),
        rec(FitAndFlare, 0.88, "Highlights a defined waist"),
        rec(ALine, 0.82, "Classic and flattering on any figure"),
        rec(Ballgown, 0.75, "Creates a timeless princess look"),
    ];
    const PEAR: [Recommendation; 5] = [
        rec(ALine, 0.95, "Skims over the hips and balances proportions"),
        rec(Ballgown, 0.92, "Full skirt balances the silhouette"),
        rec(Empire, 0.85, "Draws attention upward to the bust"),
        rec(FitAndFlare, 0.78, "Flare adds volume to balance the hips"),
        rec(Bohemian, 0.75, "Flowy fabric follows the shape softly"),
    ];
    const APPLE: [Recommendation; 5] = [
        rec(Empire, 0.95, "Flows over the midsection"),
        rec(ALine, 0.92, "Skims the waist with ease"),
        rec(Ballgown, 0.85, "Cinches above the waist for definition"),
        rec(Bohemian, 0.80, "Relaxed fit that stays comfortable"),
        rec(Sheath, 0.65, "Works with the right fabric draping"),
    ];
    const RECTANGLE: [Recommendation; 5] = [
        rec(Ballgown, 0.95, "Creates curves with a full skirt"),
        rec(Mermaid, 0.90, "Adds curves at the hips and bust"),
        rec(FitAndFlare, 0.88, "Defines the waist and adds shape"),
        rec(ALine, 0.82, "Classic and universally flattering"),
        rec(Sheath, 0.75, "Sleek and modern with the right details"),
    ];
    const INVERTED_TRIANGLE: [Recommendation; 5] = [
        rec(ALine, 0.95, "Balances broader shoulders with a flared skirt"),
        rec(Ballgown, 0.92, "Full skirt creates visual balance"),
        rec(FitAndFlare, 0.85, "Adds volume below to balance the shoulders"),
        rec(Bohemian, 0.78, "Soft silhouette softens angles"),
        rec(Empire, 0.72, "Draws focus to the bust"),
    ];

    match body_type {
        BodyType::Hourglass => &HOURGLASS,
        BodyType::Pear => &PEAR,
        BodyType::Apple => &APPLE,
        BodyType::Rectangle => &RECTANGLE,
        BodyType::InvertedTriangle => &INVERTED_TRIANGLE,
    }
}

/// Up to `limit` silhouettes for a body type, best first.
pub fn recommend_silhouettes(body_type: BodyType, limit: usize) -> Vec<Recommendation> {
    recommendations(body_type).iter().take(limit).copied().collect()
}

/// Everything the classifier says about one set of measurements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct Classification {
    pub body_type: BodyType,
    pub size: u8,
    pub size_range: (u8, u8),
    pub silhouettes: Vec<Recommendation>,
}

/// Classify, size and recommend from inches.
pub fn classify(bust: f64, waist: f64, hips: f64, silhouette_limit: usize) -> Classification {
    let body_type = classify_body_type(bust, waist, hips);
    let size = dress_size(bust, waist, hips);
    Classification {
        body_type,
        size,
        size_range: size_range(size),
        silhouettes: recommend_silhouettes(body_type, silhouette_limit),
    }
}
