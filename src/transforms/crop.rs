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

use image::{DynamicImage, Rgb, RgbImage};
use rand::{thread_rng, Rng};

use crate::config::SizeConfig;
use crate::{Batched, Record, Transform};

/// The name of the field that receives the partial-sketch occlusion after a random crop.
pub const CONDITION_IMAGE_KEY: &str = "condition_img";

pub(crate) struct Components {
	pub keys: Vec<String>,
	pub batches: Vec<Batched<DynamicImage>>,
	pub img: usize,
	pub listed: bool
}

impl Components {
	/// Pulls every target field out of the record as parallel image batches, checking the
	/// batch-mode invariant: all paired fields share `img`'s listedness and length.
	pub fn take(record: &mut Record, keys: &[String]) -> anyhow::Result<Self> {
		let listed = record.is_batch()?;
		let mut batches = Vec::with_capacity(keys.len());
		for key in keys {
			batches.push(record.take_images(key)?);
		}
		// constructors guarantee `img` is among the keys
		let img = keys.iter().position(|k| k == "img").unwrap_or_default();
		let len = batches[img].len();
		for (key, batch) in keys.iter().zip(&batches) {
			anyhow::ensure!(
				batch.listed == listed,
				"field `{key}` must be {} like `img`",
				if listed { "list-valued" } else { "single-valued" }
			);
			anyhow::ensure!(batch.len() == len, "field `{key}` has {} elements, but `img` has {len}", batch.len());
		}
		Ok(Self {
			keys: keys.to_vec(),
			batches,
			img,
			listed
		})
	}

	pub fn len(&self) -> usize {
		self.batches[self.img].len()
	}

	pub fn dimensions(&self, element: usize) -> (u32, u32) {
		let img = &self.batches[self.img].items[element];
		(img.height(), img.width())
	}

	pub fn ensure_same_size(&self, element: usize) -> anyhow::Result<()> {
		let (h, w) = self.dimensions(element);
		for (key, batch) in self.keys.iter().zip(&self.batches) {
			let item = &batch.items[element];
			anyhow::ensure!(
				(item.height(), item.width()) == (h, w),
				"size mismatch: field `{key}` is {}x{} but `img` is {h}x{w}",
				item.height(),
				item.width()
			);
		}
		Ok(())
	}

	pub fn put(self, record: &mut Record) {
		for (key, batch) in self.keys.into_iter().zip(self.batches) {
			record.put_images(key, batch);
		}
	}
}

fn put_crop_metadata(record: &mut Record, listed: bool, top_left: Vec<Vec<u32>>, bottom_right: Vec<Vec<u32>>, before: Vec<Vec<u32>>) {
	record.put_coords("crop_top_left", Batched { items: top_left, listed });
	record.put_coords("crop_bottom_right", Batched { items: bottom_right, listed });
	record.put_coords("before_crop_size", Batched { items: before, listed });
}

/// Occludes a sketch with a randomly sized window pasted onto a white canvas.
///
/// Most of the time (~90%) the window covers the whole frame and the sketch passes through
/// unchanged; otherwise each side is shrunk by a random factor of up to 6 and the window lands
/// at a random valid offset, leaving the rest of the canvas white. Downstream conditioning
/// models train against these partial sketches.
fn partial_sketch<R: Rng>(rng: &mut R, image: &DynamicImage) -> DynamicImage {
	let rgb = image.to_rgb8();
	let (w, h) = rgb.dimensions();
	let mut canvas = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));

	let spread = if rng.gen::<f64>() < 0.9 { 1.0 } else { rng.gen::<f64>() * 5.0 + 1.0 };
	let window_w = window_side(rng, w, spread);
	let window_h = window_side(rng, h, spread);
	let x0 = if window_w < w { (rng.gen::<f64>() * (w - window_w) as f64) as u32 } else { 0 };
	let y0 = if window_h < h { (rng.gen::<f64>() * (h - window_h) as f64) as u32 } else { 0 };

	for y in y0..(y0 + window_h).min(h) {
		for x in x0..(x0 + window_w).min(w) {
			canvas.put_pixel(x, y, *rgb.get_pixel(x, y));
		}
	}
	DynamicImage::ImageRgb8(canvas)
}

fn window_side<R: Rng>(rng: &mut R, side: u32, spread: f64) -> u32 {
	let divisor = rng.gen::<f64>() * spread;
	// a divisor under 1 blows the window past the frame; clamp it to the full side
	if divisor <= 1.0 { side } else { ((side as f64 / divisor) as u32).clamp(1, side) }
}

/// Crops all target fields to a fixed size with one shared random offset per element.
///
/// The difference from a plain random crop is
/// 1. the chosen crop rectangle is recorded as `crop_top_left`, `crop_bottom_right` and
///    `before_crop_size`, and
/// 2. the same random offset is applied to every target field of an element, so paired fields
///    like `img` and `condition_img` stay spatially aligned.
///
/// When `condition_img` is among the targets it is additionally replaced with a partial-sketch
/// occlusion of the cropped image after cropping.
pub struct RandomCrop {
	size: (u32, u32),
	keys: Vec<String>,
	force_same_size: bool
}

impl RandomCrop {
	/// Creates a random crop to `size`, applied to the `keys` fields with identical geometry.
	///
	/// When `force_same_size` is set (the default in configs), every target field must share
	/// `img`'s dimensions or the crop fails with a size-mismatch error.
	pub fn new(size: impl Into<SizeConfig>, keys: Vec<String>, force_same_size: bool) -> anyhow::Result<Self> {
		let (h, w) = size.into().hw();
		anyhow::ensure!(h > 0 && w > 0, "crop size must be nonzero");
		anyhow::ensure!(keys.iter().any(|k| k == "img"), "crop keys must include `img`");
		Ok(Self {
			size: (h, w),
			keys,
			force_same_size
		})
	}
}

impl Transform for RandomCrop {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let mut components = Components::take(&mut record, &self.keys)?;
		let (th, tw) = self.size;
		let mut rng = thread_rng();

		let mut top_left = Vec::with_capacity(components.len());
		let mut bottom_right = Vec::with_capacity(components.len());
		let mut before = Vec::with_capacity(components.len());
		for i in 0..components.len() {
			if self.force_same_size {
				components.ensure_same_size(i)?;
			}
			let (h, w) = components.dimensions(i);
			anyhow::ensure!(th <= h && tw <= w, "crop size {th}x{tw} exceeds image size {h}x{w}");
			let y1 = if h == th { 0 } else { rng.gen_range(0..=h - th) };
			let x1 = if w == tw { 0 } else { rng.gen_range(0..=w - tw) };

			for (key, batch) in components.keys.iter().zip(components.batches.iter_mut()) {
				let cropped = batch.items[i].crop_imm(x1, y1, tw, th);
				batch.items[i] = if key == CONDITION_IMAGE_KEY { partial_sketch(&mut rng, &cropped) } else { cropped };
			}

			top_left.push(vec![y1, x1]);
			bottom_right.push(vec![y1 + th, x1 + tw]);
			before.push(vec![h, w]);
		}

		let listed = components.listed;
		components.put(&mut record);
		put_crop_metadata(&mut record, listed, top_left, bottom_right, before);
		Ok(record)
	}
}

/// Crops all target fields to a fixed size around the image center.
///
/// Deterministic sibling of [`RandomCrop`]: the offset is `max(0, round((H - th) / 2))` per
/// axis, the same crop-rectangle metadata is recorded, all target fields must share `img`'s
/// dimensions, and no occlusion is applied.
pub struct CenterCrop {
	size: (u32, u32),
	keys: Vec<String>
}

impl CenterCrop {
	/// Creates a center crop to `size`, applied to the `keys` fields with identical geometry.
	pub fn new(size: impl Into<SizeConfig>, keys: Vec<String>) -> anyhow::Result<Self> {
		let (h, w) = size.into().hw();
		anyhow::ensure!(h > 0 && w > 0, "crop size must be nonzero");
		anyhow::ensure!(keys.iter().any(|k| k == "img"), "crop keys must include `img`");
		Ok(Self { size: (h, w), keys })
	}
}

impl Transform for CenterCrop {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let mut components = Components::take(&mut record, &self.keys)?;
		let (th, tw) = self.size;

		let mut top_left = Vec::with_capacity(components.len());
		let mut bottom_right = Vec::with_capacity(components.len());
		let mut before = Vec::with_capacity(components.len());
		for i in 0..components.len() {
			components.ensure_same_size(i)?;
			let (h, w) = components.dimensions(i);
			anyhow::ensure!(th <= h && tw <= w, "center crop size {th}x{tw} exceeds image size {h}x{w}");
			let y1 = (((h as f64 - th as f64) / 2.0).round() as i64).max(0) as u32;
			let x1 = (((w as f64 - tw as f64) / 2.0).round() as i64).max(0) as u32;

			for batch in components.batches.iter_mut() {
				batch.items[i] = batch.items[i].crop_imm(x1, y1, tw, th);
			}

			top_left.push(vec![y1, x1]);
			bottom_right.push(vec![y1 + th, x1 + tw]);
			before.push(vec![h, w]);
		}

		let listed = components.listed;
		components.put(&mut record);
		put_crop_metadata(&mut record, listed, top_left, bottom_right, before);
		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	use image::{DynamicImage, Rgb, RgbImage};
	use rand::thread_rng;

	use super::partial_sketch;

	#[test]
	fn test_partial_sketch_is_windowed_copy() {
		let mut source = RgbImage::from_pixel(13, 9, Rgb([10, 20, 30]));
		source.put_pixel(4, 5, Rgb([200, 100, 50]));
		let source = DynamicImage::ImageRgb8(source);

		let mut rng = thread_rng();
		let expected = source.to_rgb8();
		for _ in 0..64 {
			let sketch = partial_sketch(&mut rng, &source).to_rgb8();
			assert_eq!(sketch.dimensions(), (13, 9));
			// every pixel is either white (occluded) or a verbatim copy of the source
			for (x, y, pixel) in sketch.enumerate_pixels() {
				assert!(*pixel == Rgb([255, 255, 255]) || *pixel == *expected.get_pixel(x, y));
			}
		}
	}
}
