// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Nutrition value types: fixed-point grams, meal categories, macro ratios.

use serde::{Deserialize, Serialize};

/// Kilocalories per gram of carbohydrate and protein.
pub const KCAL_PER_GRAM_CARB_PROTEIN: i64 = 4;
/// Kilocalories per gram of fat.
pub const KCAL_PER_GRAM_FAT: i64 = 9;

/// Mass in grams, stored as tenths of a gram.
///
/// Fixed-point so that add-then-remove returns a total to exactly
/// its prior value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grams(i64);

impl Grams {
    pub const ZERO: Grams = Grams(0);

    #[must_use]
    pub const fn from_decigrams(decigrams: i64) -> Self {
        Self(decigrams)
    }

    /// Round to the nearest tenth of a gram.
    #[must_use]
    pub fn from_f64(grams: f64) -> Self {
        Self((grams * 10.0).round() as i64)
    }

    #[must_use]
    pub const fn decigrams(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 10.0
    }

    /// Signed add, clamped at zero.
    #[must_use]
    pub fn offset_clamped(self, delta: i64) -> Self {
        Self(self.0.saturating_add(delta).max(0))
    }
}

impl std::fmt::Display for Grams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}g", self.as_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealCategory {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealCategory {
    pub const ALL: [MealCategory; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for MealCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Share of total intake calories contributed by each macro, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroRatios {
    pub carbs_percent: f64,
    pub protein_percent: f64,
    pub fat_percent: f64,
}

impl MacroRatios {
    /// `None` when there is no intake, so the UI never shows a misleading 0%.
    #[must_use]
    pub fn compute(total_calories_in: i64, carbs: Grams, protein: Grams, fat: Grams) -> Option<Self> {
        if total_calories_in <= 0 {
            return None;
        }
        let total = total_calories_in as f64;
        let percent = |g: Grams, kcal_per_gram: i64| {
            (g.decigrams() * kcal_per_gram) as f64 / 10.0 / total * 100.0
        };
        Some(Self {
            carbs_percent: percent(carbs, KCAL_PER_GRAM_CARB_PROTEIN),
            protein_percent: percent(protein, KCAL_PER_GRAM_CARB_PROTEIN),
            fat_percent: percent(fat, KCAL_PER_GRAM_FAT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grams_round_to_tenths() {
        assert_eq!(Grams::from_f64(12.34).decigrams(), 123);
        assert_eq!(Grams::from_f64(12.36).decigrams(), 124);
        assert_eq!(format!("{}", Grams::from_decigrams(125)), "12.5g");
    }

    #[test]
    fn test_grams_offset_clamps() {
        let g = Grams::from_decigrams(50);
        assert_eq!(g.offset_clamped(-80), Grams::ZERO);
        assert_eq!(g.offset_clamped(25).decigrams(), 75);
    }

    #[test]
    fn test_macro_ratios_absent_without_intake() {
        assert_eq!(MacroRatios::compute(0, Grams::from_f64(10.0), Grams::ZERO, Grams::ZERO), None);
    }

    #[test]
    fn test_macro_ratios_percent_of_intake() {
        // 50g carbs = 200 kcal, 25g protein = 100 kcal, 10g fat = 90 kcal
        let ratios = MacroRatios::compute(
            400,
            Grams::from_f64(50.0),
            Grams::from_f64(25.0),
            Grams::from_f64(10.0),
        )
        .unwrap();
        assert!((ratios.carbs_percent - 50.0).abs() < 1e-9);
        assert!((ratios.protein_percent - 25.0).abs() < 1e-9);
        assert!((ratios.fat_percent - 22.5).abs() < 1e-9);
    }

    #[test]
    fn test_meal_category_parse() {
        for meal in MealCategory::ALL {
            assert_eq!(MealCategory::parse(meal.as_str()), Some(meal));
        }
        assert_eq!(MealCategory::parse("brunch"), None);
    }
}
