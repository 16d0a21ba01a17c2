use image::imageops::FilterType;
use image::DynamicImage;

use super::crop::CenterCrop;
use super::Transform;
use crate::Record;

/// Routes a single image to the size bucket with the closest aspect ratio, then resizes and
/// center-crops all target fields to that bucket's target size.
///
/// Bucket distance is the absolute difference between the image's `h / w` ratio and each
/// bucket's; ties go to the earliest bucket in the configured list. The resize scales each
/// field up just enough to cover the bucket (for an image already at the bucket's ratio this
/// is exactly a shorter-side resize), so the center crop never pads. Batch input is not
/// supported.
pub struct MultiAspectRatioResizeCenterCrop {
	sizes: Vec<(u32, u32)>,
	aspect_ratios: Vec<f64>,
	keys: Vec<String>,
	filter: FilterType,
	crops: Vec<CenterCrop>
}

impl MultiAspectRatioResizeCenterCrop {
	/// Creates a router over `sizes` buckets, each resizing and cropping the `keys` fields.
	pub fn new(sizes: Vec<[u32; 2]>, keys: Vec<String>, filter: FilterType) -> anyhow::Result<Self> {
		anyhow::ensure!(!sizes.is_empty(), "at least one size bucket is required");
		anyhow::ensure!(keys.iter().any(|k| k == "img"), "crop keys must include `img`");
		let mut aspect_ratios = Vec::with_capacity(sizes.len());
		let mut crops = Vec::with_capacity(sizes.len());
		let mut bucket_sizes = Vec::with_capacity(sizes.len());
		for [h, w] in sizes {
			anyhow::ensure!(h > 0 && w > 0, "bucket sizes must be nonzero");
			aspect_ratios.push(h as f64 / w as f64);
			crops.push(CenterCrop::new([h, w], keys.clone())?);
			bucket_sizes.push((h, w));
		}
		Ok(Self {
			sizes: bucket_sizes,
			aspect_ratios,
			keys,
			filter,
			crops
		})
	}

	/// The index of the bucket whose aspect ratio is closest to `aspect_ratio`.
	pub fn bucket_for(&self, aspect_ratio: f64) -> usize {
		let mut bucket = 0;
		let mut best = f64::INFINITY;
		for (i, ratio) in self.aspect_ratios.iter().enumerate() {
			let distance = (aspect_ratio - ratio).abs();
			if distance < best {
				best = distance;
				bucket = i;
			}
		}
		bucket
	}
}

fn resize_to_cover(img: &DynamicImage, th: u32, tw: u32, filter: FilterType) -> anyhow::Result<DynamicImage> {
	let (h, w) = (img.height(), img.width());
	anyhow::ensure!(h > 0 && w > 0, "cannot resize an empty image");
	let scale = f64::max(th as f64 / h as f64, tw as f64 / w as f64);
	let nh = ((h as f64 * scale).round() as u32).max(th);
	let nw = ((w as f64 * scale).round() as u32).max(tw);
	Ok(img.resize_exact(nw, nh, filter))
}

impl Transform for MultiAspectRatioResizeCenterCrop {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		anyhow::ensure!(!record.is_batch()?, "multi-aspect-ratio routing only supports a single image");
		let sizes = record.image_sizes("img")?;
		let (h, w) = sizes.items[0];
		let bucket = self.bucket_for(h as f64 / w as f64);
		let (th, tw) = self.sizes[bucket];

		for key in &self.keys {
			let mut images = record.take_images(key)?;
			for img in images.items.iter_mut() {
				*img = resize_to_cover(img, th, tw, self.filter)?;
			}
			record.put_images(key.clone(), images);
		}
		self.crops[bucket].transform(record)
	}
}

#[cfg(test)]
mod tests {
	use image::imageops::FilterType;
	use image::DynamicImage;

	use super::MultiAspectRatioResizeCenterCrop;
	use crate::{Record, Transform, Value};

	#[test]
	fn test_nearest_bucket_first_occurrence() {
		let router =
			MultiAspectRatioResizeCenterCrop::new(vec![[512, 512], [512, 1024], [1024, 512]], vec!["img".to_string()], FilterType::Triangle).unwrap();
		// ratios are [1.0, 0.5, 2.0]
		assert_eq!(router.bucket_for(0.6), 1);
		assert_eq!(router.bucket_for(1.4), 0);
		// equidistant between 1.0 and 0.5: the earlier bucket wins
		assert_eq!(router.bucket_for(0.75), 0);
	}

	#[test]
	fn test_routes_to_bucket_size() {
		let router = MultiAspectRatioResizeCenterCrop::new(vec![[64, 64], [32, 64]], vec!["img".to_string()], FilterType::Nearest).unwrap();
		let mut record = Record::new();
		// ratio 0.6 is closer to the 0.5 bucket
		record.insert("img", DynamicImage::new_rgb8(100, 60));
		let record = router.transform(record).unwrap();
		match record.get("img") {
			Some(Value::Image(img)) => assert_eq!((img.height(), img.width()), (32, 64)),
			other => panic!("unexpected value: {other:?}")
		}
	}

	#[test]
	fn test_rejects_batches() {
		let router = MultiAspectRatioResizeCenterCrop::new(vec![[64, 64]], vec!["img".to_string()], FilterType::Nearest).unwrap();
		let mut record = Record::new();
		record.insert("img", vec![DynamicImage::new_rgb8(64, 64)]);
		assert!(router.transform(record).is_err());
	}
}
