//! Mask handling for inpainting-style training inputs.

use anyhow::Context;
use ndarray::{concatenate, Array3, Axis};

use crate::{Record, Transform, Value};

/// Pixels with mask values under this threshold are kept by [`GetMaskedImage`].
const MASK_THRESHOLD: f32 = 0.5;

/// Converts a single mask image into a `(1, H, W)` tensor with values in `[0, 1]`.
///
/// The mask field is single-image-only; batch input is not supported.
pub struct MaskToTensor {
	key: String
}

impl MaskToTensor {
	/// Creates a mask conversion for the `key` field.
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into() }
	}
}

impl Transform for MaskToTensor {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let key = &self.key;
		match record.take(key).with_context(|| format!("record is missing field `{key}`"))? {
			Value::Image(mask) => {
				let luma = mask.to_luma32f();
				let (w, h) = luma.dimensions();
				let tensor = Array3::from_shape_fn((1, h as usize, w as usize), |(_, y, x)| luma.get_pixel(x as u32, y as u32)[0]);
				record.insert(key.clone(), Value::Tensor(tensor));
				Ok(record)
			}
			Value::ImageList(_) => anyhow::bail!("mask conversion only supports a single image"),
			other => {
				record.insert(key.clone(), other);
				anyhow::bail!("field `{key}` is not image-valued")
			}
		}
	}
}

/// Writes a masked copy of `img` under the configured output key:
/// `masked_image = img * (mask < 0.5)`.
///
/// Both `img` and `mask` must already be tensors (run to-tensor and mask-to-tensor first);
/// only single images are supported.
pub struct GetMaskedImage {
	key: String
}

impl GetMaskedImage {
	/// Creates a masked-image extraction writing to the `key` field.
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into() }
	}
}

impl Transform for GetMaskedImage {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let img = record.take_tensors("img")?;
		anyhow::ensure!(!img.listed, "masked-image extraction only supports a single image");
		let mask = record.take_tensors("mask")?;
		anyhow::ensure!(!mask.listed, "masked-image extraction only supports a single mask");

		let (img_t, mask_t) = (&img.items[0], &mask.items[0]);
		anyhow::ensure!(
			img_t.shape()[1..] == mask_t.shape()[1..],
			"mask size {:?} does not match image size {:?}",
			&mask_t.shape()[1..],
			&img_t.shape()[1..]
		);
		let keep = mask_t.index_axis(Axis(0), 0).mapv(|v| if v < MASK_THRESHOLD { 1.0 } else { 0.0 });
		let mut masked = img_t.clone();
		for mut plane in masked.outer_iter_mut() {
			plane.zip_mut_with(&keep, |value, keep| *value *= *keep);
		}

		record.put_tensors("img", img);
		record.put_tensors("mask", mask);
		record.insert(self.key.clone(), Value::Tensor(masked));
		Ok(record)
	}
}

/// Concatenates a tensor-list field along the channel axis into a single tensor.
pub struct ConcatImages {
	keys: Vec<String>
}

impl ConcatImages {
	/// Creates a concatenation over the `keys` tensor-list fields.
	pub fn new(keys: Vec<String>) -> anyhow::Result<Self> {
		anyhow::ensure!(!keys.is_empty(), "concatenation needs at least one target field");
		Ok(Self { keys })
	}
}

impl Transform for ConcatImages {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		for key in &self.keys {
			let tensors = record.take_tensors(key)?;
			anyhow::ensure!(tensors.listed, "field `{key}` must be list-valued to concatenate");
			let views: Vec<_> = tensors.items.iter().map(|tensor| tensor.view()).collect();
			let merged = concatenate(Axis(0), &views).with_context(|| format!("cannot concatenate field `{key}`: mismatched shapes"))?;
			record.insert(key.clone(), Value::Tensor(merged));
		}
		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	use ndarray::Array3;

	use super::{ConcatImages, GetMaskedImage};
	use crate::{Record, Transform, Value};

	#[test]
	fn test_masked_image() {
		let mut record = Record::new();
		record.insert("img", Value::Tensor(Array3::from_elem((3, 2, 2), 0.8f32)));
		let mut mask = Array3::zeros((1, 2, 2));
		mask[[0, 0, 0]] = 1.0f32;
		record.insert("mask", Value::Tensor(mask));

		let record = GetMaskedImage::new("masked_image").transform(record).unwrap();
		match record.get("masked_image") {
			Some(Value::Tensor(masked)) => {
				assert_eq!(masked[[0, 0, 0]], 0.0);
				assert_eq!(masked[[2, 0, 0]], 0.0);
				assert_eq!(masked[[0, 1, 1]], 0.8);
			}
			other => panic!("unexpected value: {other:?}")
		}
	}

	#[test]
	fn test_concat_channels() {
		let mut record = Record::new();
		record.insert(
			"img",
			Value::TensorList(vec![Array3::zeros((3, 2, 2)), Array3::from_elem((3, 2, 2), 1.0f32)])
		);
		let record = ConcatImages::new(vec!["img".to_string()]).unwrap().transform(record).unwrap();
		match record.get("img") {
			Some(Value::Tensor(merged)) => assert_eq!(merged.shape(), [6, 2, 2]),
			other => panic!("unexpected value: {other:?}")
		}
	}
}
