//! Target box and fill-mode of a cached rendition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a source image is reconciled with the aspect ratio of its target box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillMode {
    /// Scale to exactly the target box, ignoring aspect ratio.
    #[default]
    Stretch,
    /// Preserve aspect ratio and cover the whole box, cropping the overflow.
    PreserveAspectCrop,
    /// Preserve aspect ratio and fit inside the box, padding with transparency.
    PreserveAspectFit,
}

impl FillMode {
    /// Map a display item's fill-mode name. Unrecognized names fall back to
    /// `Stretch`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "PreserveAspectCrop" => FillMode::PreserveAspectCrop,
            "PreserveAspectFit" => FillMode::PreserveAspectFit,
            _ => FillMode::Stretch,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FillMode::Stretch => "Stretch",
            FillMode::PreserveAspectCrop => "PreserveAspectCrop",
            FillMode::PreserveAspectFit => "PreserveAspectFit",
        }
    }

    /// Short tag used in cache file names.
    pub fn tag(&self) -> &'static str {
        match self {
            FillMode::PreserveAspectCrop => "crop",
            FillMode::PreserveAspectFit => "fit",
            FillMode::Stretch => "stretch",
        }
    }

    /// Whether the scaled image is centred on a transparent canvas.
    pub fn pads(&self) -> bool {
        !matches!(self, FillMode::Stretch)
    }
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested rendition: pixel size of the target box plus its fill-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSpec {
    pub width: u32,
    pub height: u32,
    pub fill_mode: FillMode,
}

impl TargetSpec {
    pub fn new(width: u32, height: u32, fill_mode: FillMode) -> Self {
        Self {
            width,
            height,
            fill_mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
