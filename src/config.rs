//! Typed configuration for building transform pipelines.
//!
//! A pipeline is described as a list of [`TransformConfig`] entries (e.g. deserialized from
//! JSON with the `type` tag selecting the transform kind) and materialized with
//! [`Pipeline::from_config`](crate::Pipeline::from_config). Every string-named option
//! (interpolation mode, numeric dtype, transform kind) is resolved to its semantic type at
//! construction time, so a misconfigured pipeline fails before any sample is processed.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// A crop or resize target size: a single integer for a square, or an `[h, w]` pair.
///
/// For resizes, a single integer means "resize the shorter side to this length, preserving
/// aspect ratio" while a pair is an exact target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SizeConfig {
	/// A square `(size, size)` target.
	Square(u32),
	/// An exact `[height, width]` target.
	Exact([u32; 2])
}

impl SizeConfig {
	/// The `(height, width)` this size expands to.
	pub fn hw(self) -> (u32, u32) {
		match self {
			SizeConfig::Square(s) => (s, s),
			SizeConfig::Exact([h, w]) => (h, w)
		}
	}
}

impl From<u32> for SizeConfig {
	fn from(value: u32) -> Self {
		SizeConfig::Square(value)
	}
}

impl From<[u32; 2]> for SizeConfig {
	fn from(value: [u32; 2]) -> Self {
		SizeConfig::Exact(value)
	}
}

/// Numeric precision for packed tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DType {
	/// 32-bit IEEE 754 floats.
	Float32
}

/// Resolves an interpolation mode name to an [`image::imageops::FilterType`].
///
/// Accepted names are `nearest`, `bilinear`, `bicubic`, `gaussian` and `lanczos`; anything
/// else is a configuration error.
pub(crate) fn interpolation_from_name(name: &str) -> anyhow::Result<FilterType> {
	match name.to_lowercase().as_str() {
		"nearest" => Ok(FilterType::Nearest),
		"bilinear" => Ok(FilterType::Triangle),
		"bicubic" => Ok(FilterType::CatmullRom),
		"gaussian" => Ok(FilterType::Gaussian),
		"lanczos" => Ok(FilterType::Lanczos3),
		_ => anyhow::bail!("unknown interpolation mode `{name}`; expected one of `nearest`, `bilinear`, `bicubic`, `gaussian`, `lanczos`")
	}
}

/// Resolves a numeric dtype name to a [`DType`].
pub(crate) fn dtype_from_name(name: &str) -> anyhow::Result<DType> {
	match name.to_lowercase().as_str() {
		"float32" | "float" | "f32" => Ok(DType::Float32),
		_ => anyhow::bail!("unknown dtype `{name}`; expected `float32`")
	}
}

fn default_image_keys() -> Vec<String> {
	vec!["img".to_string()]
}

fn default_text_keys() -> Vec<String> {
	vec!["text".to_string()]
}

fn default_mask_key() -> String {
	"mask".to_string()
}

fn default_masked_image_key() -> String {
	"masked_image".to_string()
}

fn default_interpolation() -> String {
	"bilinear".to_string()
}

fn default_dtype() -> String {
	"float32".to_string()
}

fn default_flip_p() -> f64 {
	0.5
}

fn default_drop_p() -> f64 {
	0.1
}

fn default_true() -> bool {
	true
}

/// Configuration for a single transform in a pipeline.
///
/// This enum is the closed registry of transform kinds: deserializing an unknown `type` tag
/// fails immediately, and [`build`](Self::build) validates every option before any sample is
/// processed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum TransformConfig {
	/// Record the pre-crop image shape as `ori_img_shape`.
	SaveImageShape,
	/// Crop all target keys with one shared random offset per element; see
	/// [`RandomCrop`](crate::RandomCrop).
	#[serde(rename_all = "kebab-case")]
	RandomCrop {
		/// Desired output size of the crop.
		size: SizeConfig,
		/// Fields to crop with identical geometry.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>,
		/// Assert that all target fields share `img`'s dimensions.
		#[serde(default = "default_true")]
		force_same_size: bool
	},
	/// Deterministic center crop; see [`CenterCrop`](crate::CenterCrop).
	CenterCrop {
		/// Desired output size of the crop.
		size: SizeConfig,
		/// Fields to crop with identical geometry.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	},
	/// Route a single image to the closest-aspect-ratio bucket, then resize and center-crop
	/// to that bucket's size; see
	/// [`MultiAspectRatioResizeCenterCrop`](crate::MultiAspectRatioResizeCenterCrop).
	MultiAspectRatioResizeCenterCrop {
		/// The `[height, width]` target of each bucket.
		sizes: Vec<[u32; 2]>,
		/// Fields to resize and crop with identical geometry.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>,
		/// Interpolation mode name for the resize step.
		#[serde(default = "default_interpolation")]
		interpolation: String
	},
	/// Flip all target keys together with probability `p` per element; see
	/// [`RandomHorizontalFlip`](crate::RandomHorizontalFlip).
	RandomHorizontalFlip {
		/// Probability of flipping each element.
		#[serde(default = "default_flip_p")]
		p: f64,
		/// Fields to flip together.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	},
	/// Derive the SDXL `time_ids` conditioning vector.
	ComputeTimeIds,
	/// Derive the aMUSEd `micro_conds` conditioning vector.
	ComputeMicroConds,
	/// Derive the PixArt `resolution` and `aspect_ratio` conditioning values.
	ComputePixArtImgInfo,
	/// Normalize captions; see [`CleanCaption`](crate::CleanCaption).
	#[serde(rename_all = "kebab-case")]
	CleanCaption {
		/// Text fields to clean.
		#[serde(default = "default_text_keys")]
		keys: Vec<String>,
		/// Run the full rewrite-rule sequence; when `false`, captions are only lowercased
		/// and trimmed.
		#[serde(default = "default_true")]
		clean_caption: bool
	},
	/// Replace captions with the empty string with probability `p` per record.
	RandomTextDrop {
		/// Probability of dropping the caption.
		#[serde(default = "default_drop_p")]
		p: f64,
		/// Text fields to drop.
		#[serde(default = "default_text_keys")]
		keys: Vec<String>
	},
	/// Append a constant phrase to each caption.
	#[serde(rename_all = "kebab-case")]
	AddConstantCaption {
		/// The phrase to append.
		constant_caption: String,
		/// Text fields to extend.
		#[serde(default = "default_text_keys")]
		keys: Vec<String>
	},
	/// Convert a single mask image to a `(1, H, W)` tensor.
	MaskToTensor {
		/// The mask field.
		#[serde(default = "default_mask_key")]
		key: String
	},
	/// Write `img` with everything under the mask zeroed out.
	GetMaskedImage {
		/// The output field.
		#[serde(default = "default_masked_image_key")]
		key: String
	},
	/// Concatenate a tensor list along the channel axis.
	ConcatImages {
		/// Tensor-list fields to concatenate.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	},
	/// Resize the target keys; see [`ImageOp::Resize`](crate::ImageOp).
	Resize {
		/// The target size; a single integer resizes the shorter side.
		size: SizeConfig,
		/// Interpolation mode name.
		#[serde(default = "default_interpolation")]
		interpolation: String,
		/// Fields to resize, each element independently.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	},
	/// Convert the target keys from images to CHW tensors in `[0, 1]`.
	ToTensor {
		/// Numeric dtype name for the packed tensor.
		#[serde(default = "default_dtype")]
		dtype: String,
		/// Fields to convert, each element independently.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	},
	/// Channelwise-normalize tensor-valued keys.
	Normalize {
		/// Per-channel means; a single value broadcasts to all channels.
		mean: Vec<f32>,
		/// Per-channel standard deviations; a single value broadcasts to all channels.
		std: Vec<f32>,
		/// Fields to normalize, each element independently.
		#[serde(default = "default_image_keys")]
		keys: Vec<String>
	}
}
