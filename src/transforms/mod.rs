//! Record transforms and their composition into pipelines.
//!
//! A [`Transform`] reads some fields of a [`Record`] and writes or updates others; a
//! [`Pipeline`] chains transforms so that each transform's output record is the next one's
//! input. Transforms hold no state beyond their construction-time configuration — randomness
//! (crop offsets, flip coins, occlusion shapes) is drawn fresh per call and per element.

use crate::config::{dtype_from_name, interpolation_from_name};
use crate::{Record, TransformConfig};

mod aspect;
mod conditioning;
mod crop;
mod flip;
mod masking;
mod text;
mod wrapper;

pub use self::aspect::*;
pub use self::conditioning::*;
pub use self::crop::*;
pub use self::flip::*;
pub use self::masking::*;
pub use self::text::*;
pub use self::wrapper::*;

/// A single step of a data-augmentation pipeline.
///
/// Implementations are pure with respect to the record: the only inputs are the record and the
/// transform's immutable configuration, and every error (missing field, size mismatch,
/// unsupported batch shape) aborts the whole pipeline invocation — transforms never swallow or
/// retry. `Send + Sync` is required so a pipeline can be shared across data-loading workers;
/// the pipeline itself is synchronous and single-threaded.
pub trait Transform: Send + Sync {
	/// Applies this transform to `record`, returning the updated record.
	fn transform(&self, record: Record) -> anyhow::Result<Record>;
}

/// An ordered chain of [`Transform`]s.
///
/// Pipeline authors are responsible for transform ordering; each transform checks only its own
/// preconditions (e.g. [`ComputeTimeIds`] fails if no crop has recorded `crop_top_left` yet).
pub struct Pipeline {
	transforms: Vec<Box<dyn Transform>>
}

impl Pipeline {
	/// Creates a pipeline from already-built transforms.
	pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
		Self { transforms }
	}

	/// Builds a pipeline from a transform configuration list, failing fast on the first
	/// invalid entry.
	///
	/// ```
	/// # fn main() -> anyhow::Result<()> {
	/// # use pyke_augment::{Pipeline, TransformConfig};
	/// let configs: Vec<TransformConfig> = serde_json::from_str(
	/// 	r#"[
	/// 		{ "type": "save-image-shape" },
	/// 		{ "type": "random-crop", "size": 512, "keys": ["img", "condition_img"] },
	/// 		{ "type": "random-horizontal-flip", "p": 0.5, "keys": ["img", "condition_img"] }
	/// 	]"#
	/// )?;
	/// let pipeline = Pipeline::from_config(configs)?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn from_config(configs: impl IntoIterator<Item = TransformConfig>) -> anyhow::Result<Self> {
		let transforms = configs.into_iter().map(TransformConfig::build).collect::<anyhow::Result<Vec<_>>>()?;
		log::debug!("built pipeline with {} transforms", transforms.len());
		Ok(Self::new(transforms))
	}

	/// Runs `record` through every transform in order, propagating the first error.
	pub fn apply(&self, record: Record) -> anyhow::Result<Record> {
		self.transforms.iter().try_fold(record, |record, transform| transform.transform(record))
	}

	/// The number of transforms in this pipeline.
	pub fn len(&self) -> usize {
		self.transforms.len()
	}

	/// Whether this pipeline contains no transforms.
	pub fn is_empty(&self) -> bool {
		self.transforms.is_empty()
	}
}

impl Transform for Pipeline {
	fn transform(&self, record: Record) -> anyhow::Result<Record> {
		self.apply(record)
	}
}

impl TransformConfig {
	/// Resolves this configuration into a ready-to-run transform.
	///
	/// This is the only place transform kinds are mapped to constructors; every string-valued
	/// option (interpolation mode, dtype) is resolved here, so misconfiguration surfaces
	/// before any sample is processed.
	pub fn build(self) -> anyhow::Result<Box<dyn Transform>> {
		Ok(match self {
			TransformConfig::SaveImageShape => Box::new(SaveImageShape),
			TransformConfig::RandomCrop { size, keys, force_same_size } => Box::new(RandomCrop::new(size, keys, force_same_size)?),
			TransformConfig::CenterCrop { size, keys } => Box::new(CenterCrop::new(size, keys)?),
			TransformConfig::MultiAspectRatioResizeCenterCrop { sizes, keys, interpolation } => {
				Box::new(MultiAspectRatioResizeCenterCrop::new(sizes, keys, interpolation_from_name(&interpolation)?)?)
			}
			TransformConfig::RandomHorizontalFlip { p, keys } => Box::new(RandomHorizontalFlip::new(p, keys)?),
			TransformConfig::ComputeTimeIds => Box::new(ComputeTimeIds),
			TransformConfig::ComputeMicroConds => Box::new(ComputeMicroConds),
			TransformConfig::ComputePixArtImgInfo => Box::new(ComputePixArtImgInfo),
			TransformConfig::CleanCaption { keys, clean_caption } => Box::new(CleanCaption::new(keys, clean_caption)?),
			TransformConfig::RandomTextDrop { p, keys } => Box::new(RandomTextDrop::new(p, keys)?),
			TransformConfig::AddConstantCaption { constant_caption, keys } => Box::new(AddConstantCaption::new(constant_caption, keys)?),
			TransformConfig::MaskToTensor { key } => Box::new(MaskToTensor::new(key)),
			TransformConfig::GetMaskedImage { key } => Box::new(GetMaskedImage::new(key)),
			TransformConfig::ConcatImages { keys } => Box::new(ConcatImages::new(keys)?),
			TransformConfig::Resize { size, interpolation, keys } => {
				Box::new(Wrapped::new(ImageOp::Resize { size, filter: interpolation_from_name(&interpolation)? }, keys)?)
			}
			TransformConfig::ToTensor { dtype, keys } => Box::new(Wrapped::new(ImageOp::ToTensor { dtype: dtype_from_name(&dtype)? }, keys)?),
			TransformConfig::Normalize { mean, std, keys } => Box::new(Wrapped::new(ImageOp::Normalize { mean, std }, keys)?)
		})
	}
}
