//! `pyke-augment` is a modular library for assembling the data-augmentation pipelines used to
//! prepare image/condition/text records for diffusion model fine-tuning (Stable Diffusion,
//! SDXL, DeepFloyd IF-style text cleanup, ControlNet conditioning, inpainting).
//!
//! A pipeline is a configured chain of [`Transform`]s over a per-sample [`Record`]. Geometric
//! transforms apply identical randomly-chosen parameters to all paired image fields (so an RGB
//! image and its control image stay aligned) and record the crop geometry other transforms
//! later turn into conditioning vectors:
//!
//! ```
//! # fn main() -> anyhow::Result<()> {
//! use pyke_augment::{Pipeline, Record, TransformConfig, Value};
//!
//! let configs: Vec<TransformConfig> = serde_json::from_str(
//! 	r#"[
//! 		{ "type": "save-image-shape" },
//! 		{ "type": "random-crop", "size": 32 },
//! 		{ "type": "random-horizontal-flip", "p": 0.5 },
//! 		{ "type": "compute-time-ids" },
//! 		{ "type": "clean-caption" }
//! 	]"#
//! )?;
//! let pipeline = Pipeline::from_config(configs)?;
//!
//! let mut record = Record::new();
//! record.insert("img", image::DynamicImage::new_rgb8(64, 48));
//! record.insert("text", "photo of a red fox");
//! let record = pipeline.apply(record)?;
//!
//! assert!(matches!(record.get("time_ids"), Some(Value::Vector(ids)) if ids.len() == 6));
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline core is synchronous, CPU-bound and free of I/O; a data-loading layer calls it
//! once per sample, and may share one [`Pipeline`] across workers.

#![warn(missing_docs)]
#![warn(rustdoc::all)]
#![warn(clippy::correctness, clippy::suspicious, clippy::complexity, clippy::perf, clippy::style)]
#![allow(clippy::tabs_in_doc_comments)]

mod config;
mod record;
mod transforms;

pub use image::imageops::FilterType;

pub use self::config::*;
pub use self::record::*;
pub use self::transforms::*;
