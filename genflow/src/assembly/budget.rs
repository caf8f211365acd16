//! Asset classes and their embedding budgets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ValidationError;

const KB: usize = 1024;

/// Role of an image in the document, which decides its size budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Large above-the-fold imagery.
    Hero,
    /// Logos and small UI glyphs.
    Icon,
    /// Promotional imagery inside the body.
    Campaign,
    /// Browser tab icon.
    Favicon,
    /// Anything else.
    Default,
}

impl AssetClass {
    /// Every class, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Hero,
        Self::Icon,
        Self::Campaign,
        Self::Favicon,
        Self::Default,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hero => "hero",
            Self::Icon => "icon",
            Self::Campaign => "campaign",
            Self::Favicon => "favicon",
            Self::Default => "default",
        }
    }

    /// Whether the density multiplier applies when resizing.
    #[must_use]
    pub const fn uses_density_multiplier(self) -> bool {
        !matches!(self, Self::Icon | Self::Favicon)
    }

    /// Whether transparency should be preserved when re-encoding.
    #[must_use]
    pub const fn prefers_lossless(self) -> bool {
        matches!(self, Self::Icon | Self::Favicon)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size limits and encoder settings for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingBudget {
    /// Hard ceiling; anything larger after compression is dropped.
    pub max_bytes: usize,
    /// Size the compression ladder aims for.
    pub target_bytes: usize,
    /// Encoder quality of the first ladder rung (1-100).
    pub base_quality: u8,
    /// Longest edge in pixels before the density multiplier.
    pub base_dimension: u32,
}

impl EmbeddingBudget {
    /// Creates a budget.
    #[must_use]
    pub const fn new(max_bytes: usize, target_bytes: usize, base_quality: u8, base_dimension: u32) -> Self {
        Self {
            max_bytes,
            target_bytes,
            base_quality,
            base_dimension,
        }
    }

    /// Built-in budget for a class.
    #[must_use]
    pub const fn for_class(class: AssetClass) -> Self {
        match class {
            AssetClass::Hero => Self::new(300 * KB, 200 * KB, 85, 960),
            AssetClass::Campaign => Self::new(250 * KB, 150 * KB, 82, 600),
            AssetClass::Icon => Self::new(20 * KB, 10 * KB, 90, 128),
            AssetClass::Favicon => Self::new(10 * KB, 5 * KB, 90, 48),
            AssetClass::Default => Self::new(150 * KB, 100 * KB, 80, 512),
        }
    }

    fn validate(&self, class: AssetClass) -> Result<(), ValidationError> {
        let field = |name: &str| format!("assembly.classes.{class}.{name}");
        if self.max_bytes == 0 {
            return Err(ValidationError::for_field(field("max_bytes"), "must be positive"));
        }
        if self.target_bytes == 0 || self.target_bytes > self.max_bytes {
            return Err(ValidationError::for_field(
                field("target_bytes"),
                "must be positive and not exceed max_bytes",
            ));
        }
        if !(1..=100).contains(&self.base_quality) {
            return Err(ValidationError::for_field(
                field("base_quality"),
                "must be between 1 and 100",
            ));
        }
        if self.base_dimension == 0 {
            return Err(ValidationError::for_field(
                field("base_dimension"),
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Budget configuration for one `assemble()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Per-class overrides; missing classes use [`EmbeddingBudget::for_class`].
    pub classes: BTreeMap<AssetClass, EmbeddingBudget>,
    /// Ceiling for the sum of embedded asset bytes.
    pub total_bytes: usize,
    /// Dimension multiplier for high-density displays.
    pub density_multiplier: f32,
    /// Quality decrement between ladder rungs.
    pub quality_step: u8,
    /// Lowest quality the ladder will try.
    pub min_quality: u8,
    /// Whether to minify the assembled document.
    pub minify: bool,
    /// Comments starting with this marker survive minification (first one only).
    pub metadata_marker: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            classes: AssetClass::ALL
                .iter()
                .map(|class| (*class, EmbeddingBudget::for_class(*class)))
                .collect(),
            total_bytes: 2 * KB * KB,
            density_multiplier: 2.0,
            quality_step: 10,
            min_quality: 40,
            minify: true,
            metadata_marker: "genflow:".to_string(),
        }
    }
}

impl BudgetConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides one class budget.
    #[must_use]
    pub fn with_class_budget(mut self, class: AssetClass, budget: EmbeddingBudget) -> Self {
        self.classes.insert(class, budget);
        self
    }

    /// Sets the aggregate ceiling.
    #[must_use]
    pub fn with_total_bytes(mut self, total: usize) -> Self {
        self.total_bytes = total;
        self
    }

    /// Sets the density multiplier.
    #[must_use]
    pub fn with_density_multiplier(mut self, multiplier: f32) -> Self {
        self.density_multiplier = multiplier;
        self
    }

    /// Sets the quality ladder shape.
    #[must_use]
    pub fn with_quality_ladder(mut self, step: u8, min_quality: u8) -> Self {
        self.quality_step = step;
        self.min_quality = min_quality;
        self
    }

    /// Enables or disables minification.
    #[must_use]
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    /// Sets the preserved metadata comment marker.
    #[must_use]
    pub fn with_metadata_marker(mut self, marker: impl Into<String>) -> Self {
        self.metadata_marker = marker.into();
        self
    }

    /// Budget for `class`.
    #[must_use]
    pub fn budget_for(&self, class: AssetClass) -> EmbeddingBudget {
        self.classes
            .get(&class)
            .copied()
            .unwrap_or_else(|| EmbeddingBudget::for_class(class))
    }

    /// Target longest edge for `class`, with the density multiplier applied where it belongs.
    #[must_use]
    pub fn dimension_for(&self, class: AssetClass) -> u32 {
        let base = self.budget_for(class).base_dimension;
        if class.uses_density_multiplier() {
            (base as f32 * self.density_multiplier).round() as u32
        } else {
            base
        }
    }

    /// Quality rungs from the class base quality down to `min_quality`.
    #[must_use]
    pub fn quality_ladder(&self, class: AssetClass) -> Vec<u8> {
        let base = self.budget_for(class).base_quality;
        let floor = self.min_quality.min(base);
        let step = self.quality_step.max(1);

        let mut rungs = Vec::new();
        let mut quality = base;
        while quality > floor {
            rungs.push(quality);
            quality = quality.saturating_sub(step);
        }
        rungs.push(floor);
        rungs
    }

    /// Validates every field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for class in AssetClass::ALL {
            self.budget_for(class).validate(class)?;
        }
        if self.total_bytes == 0 {
            return Err(ValidationError::for_field(
                "assembly.total_bytes",
                "must be positive",
            ));
        }
        if !self.density_multiplier.is_finite() || self.density_multiplier < 1.0 {
            return Err(ValidationError::for_field(
                "assembly.density_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.quality_step == 0 {
            return Err(ValidationError::for_field(
                "assembly.quality_step",
                "must be positive",
            ));
        }
        if !(1..=100).contains(&self.min_quality) {
            return Err(ValidationError::for_field(
                "assembly.min_quality",
                "must be between 1 and 100",
            ));
        }
        Ok(())
    }
}
