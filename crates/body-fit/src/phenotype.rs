//! Shape parameters and their initial estimate.
//!
//! A [`PhenotypeVector`] holds the six named shape scalars a body model is
//! driven by. Every field lives in [0, 1]; values are clamped on the way in,
//! so no estimate or fitter output can leave that range.

use crate::landmarks::SkeletalLandmarks;
use std::fmt;
use std::str::FromStr;

/// Named phenotype fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phenotype {
    Gender,
    Age,
    Height,
    Weight,
    Muscle,
    Proportions,
}

impl Phenotype {
    pub const COUNT: usize = 6;

    pub const ALL: [Phenotype; Phenotype::COUNT] = [
        Phenotype::Gender,
        Phenotype::Age,
        Phenotype::Height,
        Phenotype::Weight,
        Phenotype::Muscle,
        Phenotype::Proportions,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Phenotype::Gender => "gender",
            Phenotype::Age => "age",
            Phenotype::Height => "height",
            Phenotype::Weight => "weight",
            Phenotype::Muscle => "muscle",
            Phenotype::Proportions => "proportions",
        }
    }

    pub fn from_name(name: &str) -> Option<Phenotype> {
        Phenotype::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Six shape scalars, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhenotypeVector {
    values: [f64; Phenotype::COUNT],
}

impl Default for PhenotypeVector {
    /// The model's neutral body.
    fn default() -> Self {
        Self {
            values: [NEUTRAL; Phenotype::COUNT],
        }
    }
}

const NEUTRAL: f64 = 0.5;

/// Clamp to [0, 1]. NaN becomes the neutral value.
#[inline]
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl PhenotypeVector {
    /// Build from values in [`Phenotype::ALL`] order.
    pub fn from_array(values: [f64; Phenotype::COUNT]) -> Self {
        Self {
            values: values.map(clamp_unit),
        }
    }

    pub fn as_array(&self) -> [f64; Phenotype::COUNT] {
        self.values
    }

    #[inline]
    pub fn get(&self, field: Phenotype) -> f64 {
        self.values[field.index()]
    }

    /// Set a field, clamped into range.
    pub fn set(&mut self, field: Phenotype, value: f64) {
        self.values[field.index()] = clamp_unit(value);
    }

    #[must_use]
    pub fn with(mut self, field: Phenotype, value: f64) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phenotype, f64)> + '_ {
        Phenotype::ALL.into_iter().map(|p| (p, self.get(p)))
    }

    /// Largest absolute per-field difference.
    pub fn max_difference(&self, other: &PhenotypeVector) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for PhenotypeVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:.3}", field, value)?;
        }
        Ok(())
    }
}

#[cfg(feature = "config")]
impl serde::Serialize for PhenotypeVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(Phenotype::COUNT))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name(), &value)?;
        }
        map.end()
    }
}

/// Fields excluded from optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreezeSet {
    frozen: [bool; Phenotype::COUNT],
}

impl FreezeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze policy for one fit.
    ///
    /// Height and muscle follow `params`; gender is frozen whenever the
    /// caller supplied it.
    pub fn for_fit(hints: &UserHints, params: &PhenotypeParams) -> Self {
        let mut set = Self::new();
        if params.freeze_height {
            set.insert(Phenotype::Height);
        }
        if params.freeze_muscle {
            set.insert(Phenotype::Muscle);
        }
        if hints.gender.is_some() {
            set.insert(Phenotype::Gender);
        }
        set
    }

    pub fn insert(&mut self, field: Phenotype) {
        self.frozen[field.index()] = true;
    }

    #[inline]
    pub fn contains(&self, field: Phenotype) -> bool {
        self.frozen[field.index()]
    }

    /// Fields free to move.
    pub fn free(&self) -> impl Iterator<Item = Phenotype> + '_ {
        Phenotype::ALL.into_iter().filter(|p| !self.contains(*p))
    }

    pub fn iter(&self) -> impl Iterator<Item = Phenotype> + '_ {
        Phenotype::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl FromIterator<Phenotype> for FreezeSet {
    fn from_iter<I: IntoIterator<Item = Phenotype>>(iter: I) -> Self {
        let mut set = FreezeSet::new();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

/// How strongly the fitter holds each field to its initial value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RegularizationWeights {
    pub gender: f64,
    pub age: f64,
    pub height: f64,
    pub weight: f64,
    pub muscle: f64,
    pub proportions: f64,
}

impl Default for RegularizationWeights {
    fn default() -> Self {
        Self {
            gender: 100.0,
            age: 10.0,
            height: 100.0,
            weight: 0.5,
            muscle: 5.0,
            proportions: 2.0,
        }
    }
}

impl RegularizationWeights {
    pub fn get(&self, field: Phenotype) -> f64 {
        match field {
            Phenotype::Gender => self.gender,
            Phenotype::Age => self.age,
            Phenotype::Height => self.height,
            Phenotype::Weight => self.weight,
            Phenotype::Muscle => self.muscle,
            Phenotype::Proportions => self.proportions,
        }
    }
}

/// Reported gender, used to freeze the gender field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    /// Gender phenotype value.
    pub const fn phenotype(self) -> f64 {
        match self {
            Gender::Female => 1.0,
            Gender::Male => 0.0,
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "female" | "f" => Ok(Gender::Female),
            "male" | "m" => Ok(Gender::Male),
            other => Err(format!("unknown gender '{}', expected female or male", other)),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Female => "female",
            Gender::Male => "male",
        })
    }
}

/// Optional facts the caller knows about the subject.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserHints {
    pub height_cm: Option<f64>,
    pub gender: Option<Gender>,
    pub weight_kg: Option<f64>,
}

impl UserHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-positive or non-finite heights are ignored.
    #[must_use]
    pub fn with_height_cm(mut self, height_cm: f64) -> Self {
        self.height_cm = (height_cm.is_finite() && height_cm > 0.0).then_some(height_cm);
        self
    }

    #[must_use]
    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    #[must_use]
    pub fn with_weight_kg(mut self, weight_kg: f64) -> Self {
        self.weight_kg = (weight_kg.is_finite() && weight_kg > 0.0).then_some(weight_kg);
        self
    }

    /// User height in meters.
    pub fn height_m(&self) -> Option<f64> {
        self.height_cm.map(|cm| cm / 100.0)
    }
}

/// Estimate and fit settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct PhenotypeParams {
    pub regularization: RegularizationWeights,
    /// Iteration cap handed to the body model's fitter.
    pub fitter_iterations: usize,
    pub freeze_height: bool,
    /// Muscle tends to run to an extreme when left free.
    pub freeze_muscle: bool,
    /// Starting age; young adult.
    pub initial_age: f64,
}

impl Default for PhenotypeParams {
    fn default() -> Self {
        Self {
            regularization: RegularizationWeights::default(),
            fitter_iterations: 5,
            freeze_height: true,
            freeze_muscle: true,
            initial_age: 0.4,
        }
    }
}

impl PhenotypeParams {
    #[must_use]
    pub const fn with_fitter_iterations(mut self, iterations: usize) -> Self {
        self.fitter_iterations = iterations;
        self
    }

    #[must_use]
    pub const fn with_regularization(mut self, weights: RegularizationWeights) -> Self {
        self.regularization = weights;
        self
    }

    #[must_use]
    pub const fn with_freeze_muscle(mut self, freeze: bool) -> Self {
        self.freeze_muscle = freeze;
        self
    }
}

/// Height phenotype for a height in meters: 1.5 m maps to 0, 2.0 m to 1.
pub fn height_phenotype(height_m: f64) -> f64 {
    ((height_m - 1.5) / 0.5).clamp(0.05, 0.95)
}

/// Weight phenotype from the mean trunk circumference in centimeters.
pub fn weight_from_circumference(mean_circumference_cm: f64) -> f64 {
    ((mean_circumference_cm - 70.0) / 60.0 + 0.3).clamp(0.1, 0.95)
}

/// Weight phenotype from BMI: 18 maps to 0.2, 40 to 1.0.
pub fn weight_from_bmi(bmi: f64) -> f64 {
    ((bmi - 18.0) / 22.0 * 0.8 + 0.2).clamp(0.2, 1.0)
}

/// Heuristic starting point for the fitter.
///
/// Circumferences are read in mesh units and brought to centimeters through
/// the user height, so the weight estimate needs a user height.
pub fn estimate_initial(
    landmarks: &SkeletalLandmarks,
    hints: &UserHints,
    params: &PhenotypeParams,
) -> PhenotypeVector {
    let mut phenotypes = PhenotypeVector::default()
        .with(Phenotype::Age, params.initial_age)
        .with(Phenotype::Gender, hints.gender.map_or(NEUTRAL, Gender::phenotype));

    if let Some(height_m) = hints.height_m() {
        phenotypes.set(Phenotype::Height, height_phenotype(height_m));
    }

    let circ = &landmarks.circumferences;
    if let (Some(waist), Some(hips), Some(height_m)) = (circ.waist, circ.hips, hints.height_m()) {
        let weight = match hints.weight_kg {
            Some(kg) => weight_from_bmi(kg / (height_m * height_m)),
            None if landmarks.height > 0.0 => {
                let mean = (circ.bust.unwrap_or(0.0) + waist + hips) / 3.0;
                let to_cm = height_m / landmarks.height * 100.0;
                weight_from_circumference(mean * to_cm)
            }
            None => NEUTRAL,
        };
        phenotypes.set(Phenotype::Weight, weight);
    }

    if let (Some(waist), Some(hips)) = (circ.waist, circ.hips) {
        if hips > 0.0 {
            let ratio = waist / hips;
            if ratio < 0.75 {
                phenotypes.set(Phenotype::Proportions, 0.6);
            } else if ratio > 0.85 {
                phenotypes.set(Phenotype::Proportions, 0.4);
            }
        }
    }

    phenotypes
}
