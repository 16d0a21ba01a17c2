// Copyright 2022-2023 pyke.io
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array3;

use crate::config::{DType, SizeConfig};
use crate::{Record, Transform, Value};

/// A single-image primitive usable with [`Wrapped`].
///
/// This enum is the full allow-list of wrapped external primitives; there is no runtime lookup
/// into the image crate's namespace, and new primitives are added here explicitly.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ImageOp {
	/// Resize an image. A [`SizeConfig::Square`] size resizes the shorter side to that length,
	/// preserving aspect ratio; [`SizeConfig::Exact`] resizes to exactly `[h, w]`.
	Resize {
		/// The target size.
		size: SizeConfig,
		/// The interpolation filter.
		filter: FilterType
	},
	/// Convert an image into a CHW tensor with values in `[0, 1]`.
	ToTensor {
		/// Numeric precision of the packed tensor.
		dtype: DType
	},
	/// Channelwise-normalize a tensor: `(x - mean) / std`.
	Normalize {
		/// Per-channel means; a single value broadcasts to all channels.
		mean: Vec<f32>,
		/// Per-channel standard deviations; a single value broadcasts to all channels.
		std: Vec<f32>
	}
}

impl ImageOp {
	fn validate(&self) -> anyhow::Result<()> {
		match self {
			ImageOp::Resize { size, .. } => {
				let (h, w) = size.hw();
				anyhow::ensure!(h > 0 && w > 0, "resize size must be nonzero");
			}
			ImageOp::ToTensor { .. } => {}
			ImageOp::Normalize { mean, std } => {
				anyhow::ensure!(!mean.is_empty() && !std.is_empty(), "normalize `mean` and `std` must not be empty");
				anyhow::ensure!(mean.len() == std.len(), "normalize `mean` has {} values but `std` has {}", mean.len(), std.len());
				anyhow::ensure!(std.iter().all(|s| *s != 0.0), "normalize `std` must not contain zeros");
			}
		}
		Ok(())
	}

	fn apply_value(&self, key: &str, value: Value) -> anyhow::Result<Value> {
		match self {
			ImageOp::Resize { size, filter } => match value {
				Value::Image(img) => Ok(Value::Image(resize(&img, *size, *filter)?)),
				Value::ImageList(imgs) => Ok(Value::ImageList(imgs.iter().map(|img| resize(img, *size, *filter)).collect::<anyhow::Result<_>>()?)),
				_ => anyhow::bail!("cannot resize field `{key}`: not image-valued")
			},
			ImageOp::ToTensor { .. } => match value {
				Value::Image(img) => Ok(Value::Tensor(to_tensor(&img))),
				Value::ImageList(imgs) => Ok(Value::TensorList(imgs.iter().map(to_tensor).collect())),
				_ => anyhow::bail!("cannot pack field `{key}`: not image-valued")
			},
			ImageOp::Normalize { mean, std } => match value {
				Value::Tensor(tensor) => Ok(Value::Tensor(normalize(tensor, mean, std)?)),
				Value::TensorList(tensors) => {
					Ok(Value::TensorList(tensors.into_iter().map(|tensor| normalize(tensor, mean, std)).collect::<anyhow::Result<_>>()?))
				}
				_ => anyhow::bail!("cannot normalize field `{key}`: not tensor-valued (run a to-tensor transform first)")
			}
		}
	}
}

fn resize(img: &DynamicImage, size: SizeConfig, filter: FilterType) -> anyhow::Result<DynamicImage> {
	let (h, w) = (img.height(), img.width());
	anyhow::ensure!(h > 0 && w > 0, "cannot resize an empty image");
	let (nh, nw) = match size {
		SizeConfig::Square(s) => {
			// `s` is the target length of the shorter side
			if h <= w {
				(s, ((s as f64 * w as f64 / h as f64).round() as u32).max(1))
			} else {
				(((s as f64 * h as f64 / w as f64).round() as u32).max(1), s)
			}
		}
		SizeConfig::Exact([th, tw]) => (th, tw)
	};
	Ok(img.resize_exact(nw, nh, filter))
}

fn to_tensor(img: &DynamicImage) -> Array3<f32> {
	let rgb = img.to_rgb32f();
	let (w, h) = rgb.dimensions();
	Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| rgb.get_pixel(x as u32, y as u32)[c])
}

fn normalize(mut tensor: Array3<f32>, mean: &[f32], std: &[f32]) -> anyhow::Result<Array3<f32>> {
	let channels = tensor.shape()[0];
	anyhow::ensure!(
		mean.len() == 1 || mean.len() == channels,
		"normalize expects 1 or {channels} mean/std values, got {}",
		mean.len()
	);
	for (c, mut plane) in tensor.outer_iter_mut().enumerate() {
		let m = mean[if mean.len() == 1 { 0 } else { c }];
		let s = std[if std.len() == 1 { 0 } else { c }];
		plane.mapv_inplace(|v| (v - m) / s);
	}
	Ok(tensor)
}

/// Adapts a single-image primitive to operate uniformly over a set of record fields.
///
/// For every target field, a single value is transformed in place and a list value is
/// transformed element by element, preserving order and length; fields outside the target list
/// pass through untouched. Unlike [`RandomCrop`](crate::RandomCrop) and friends, elements are
/// independent — no parameters are shared across fields.
pub struct Wrapped {
	op: ImageOp,
	keys: Vec<String>
}

impl Wrapped {
	/// Creates a wrapped transform applying `op` to every element of the `keys` fields.
	pub fn new(op: ImageOp, keys: Vec<String>) -> anyhow::Result<Self> {
		anyhow::ensure!(!keys.is_empty(), "wrapped transform needs at least one target field");
		op.validate()?;
		Ok(Self { op, keys })
	}
}

impl Transform for Wrapped {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		for key in &self.keys {
			let value = record.take(key).with_context(|| format!("record is missing field `{key}`"))?;
			let value = self.op.apply_value(key, value)?;
			record.insert(key.clone(), value);
		}
		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	use image::DynamicImage;

	use super::{ImageOp, Wrapped};
	use crate::config::{DType, SizeConfig};
	use crate::{Record, Transform, Value};

	#[test]
	fn test_shorter_side_resize() {
		let mut record = Record::new();
		record.insert("img", DynamicImage::new_rgb8(100, 50));
		let resize = Wrapped::new(
			ImageOp::Resize {
				size: SizeConfig::Square(25),
				filter: image::imageops::FilterType::Nearest
			},
			vec!["img".to_string()]
		)
		.unwrap();
		let record = resize.transform(record).unwrap();
		match record.get("img") {
			Some(Value::Image(img)) => assert_eq!((img.width(), img.height()), (50, 25)),
			other => panic!("unexpected value: {other:?}")
		}
	}

	#[test]
	fn test_to_tensor_then_normalize() {
		let mut record = Record::new();
		record.insert("img", DynamicImage::new_rgb8(4, 2));
		let keys = vec!["img".to_string()];
		let record = Wrapped::new(ImageOp::ToTensor { dtype: DType::Float32 }, keys.clone())
			.unwrap()
			.transform(record)
			.unwrap();
		let record = Wrapped::new(
			ImageOp::Normalize {
				mean: vec![0.5],
				std: vec![0.5]
			},
			keys
		)
		.unwrap()
		.transform(record)
		.unwrap();
		match record.get("img") {
			// a black image is all zeros before normalization, all -1 after
			Some(Value::Tensor(tensor)) => {
				assert_eq!(tensor.shape(), [3, 2, 4]);
				assert!(tensor.iter().all(|v| (*v - -1.0).abs() < f32::EPSILON));
			}
			other => panic!("unexpected value: {other:?}")
		}
	}

	#[test]
	fn test_normalize_rejects_images() {
		let mut record = Record::new();
		record.insert("img", DynamicImage::new_rgb8(4, 4));
		let normalize = Wrapped::new(
			ImageOp::Normalize {
				mean: vec![0.5],
				std: vec![0.5]
			},
			vec!["img".to_string()]
		)
		.unwrap();
		assert!(normalize.transform(record).is_err());
	}
}
