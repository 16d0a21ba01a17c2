//! Conditioning-signal derivation from crop metadata.

use crate::{Batched, Record, Transform};

/// Fixed aesthetic score appended to the aMUSEd micro-conditioning vector.
const AESTHETIC_SCORE: f64 = 6.0;

/// Records the current image shape as `ori_img_shape` (`[h, w]` per element).
///
/// Run this before any geometric transform; the recorded shape feeds [`ComputeTimeIds`],
/// [`ComputeMicroConds`] and [`ComputePixArtImgInfo`].
pub struct SaveImageShape;

impl Transform for SaveImageShape {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let sizes = record.image_sizes("img")?;
		record.put_coords("ori_img_shape", Batched {
			items: sizes.items.iter().map(|&(h, w)| vec![h, w]).collect(),
			listed: sizes.listed
		});
		Ok(record)
	}
}

/// Derives the SDXL `time_ids` conditioning vector:
/// `ori_img_shape ++ crop_top_left ++ [target_h, target_w]` per element, where the target size
/// is the image's current (post-crop) size.
pub struct ComputeTimeIds;

impl Transform for ComputeTimeIds {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		anyhow::ensure!(record.contains("ori_img_shape"), "`time_ids` needs `ori_img_shape`; run save-image-shape first");
		anyhow::ensure!(record.contains("crop_top_left"), "`time_ids` needs `crop_top_left`; run a crop first");
		let sizes = record.image_sizes("img")?;
		let ori = metadata(&record, "ori_img_shape", sizes.len())?;
		let top_left = metadata(&record, "crop_top_left", sizes.len())?;

		let mut time_ids = Vec::with_capacity(sizes.len());
		for (i, &(h, w)) in sizes.items.iter().enumerate() {
			let mut ids: Vec<f64> = ori.items[i].iter().map(|&v| v as f64).collect();
			ids.extend(top_left.items[i].iter().map(|&v| v as f64));
			ids.extend([h as f64, w as f64]);
			time_ids.push(ids);
		}
		record.put_vectors("time_ids", Batched {
			items: time_ids,
			listed: sizes.listed
		});
		Ok(record)
	}
}

/// Derives the aMUSEd `micro_conds` conditioning vector:
/// `[ori_w, ori_h, crop_y, crop_x, aesthetic_score]` per element, with the aesthetic score
/// fixed at 6.0.
pub struct ComputeMicroConds;

impl Transform for ComputeMicroConds {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		anyhow::ensure!(record.contains("ori_img_shape"), "`micro_conds` needs `ori_img_shape`; run save-image-shape first");
		anyhow::ensure!(record.contains("crop_top_left"), "`micro_conds` needs `crop_top_left`; run a crop first");
		let sizes = record.image_sizes("img")?;
		let ori = metadata(&record, "ori_img_shape", sizes.len())?;
		let top_left = metadata(&record, "crop_top_left", sizes.len())?;

		let mut micro_conds = Vec::with_capacity(sizes.len());
		for i in 0..sizes.len() {
			// ori_img_shape is [h, w]; micro conditioning wants [w, h]
			let mut conds: Vec<f64> = ori.items[i].iter().rev().map(|&v| v as f64).collect();
			conds.extend(top_left.items[i].iter().map(|&v| v as f64));
			conds.push(AESTHETIC_SCORE);
			micro_conds.push(conds);
		}
		record.put_vectors("micro_conds", Batched {
			items: micro_conds,
			listed: sizes.listed
		});
		Ok(record)
	}
}

/// Derives the PixArt conditioning values: `resolution = [ori_h, ori_w]` as floats and
/// `aspect_ratio = h / w` of the current image, per element.
pub struct ComputePixArtImgInfo;

impl Transform for ComputePixArtImgInfo {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		anyhow::ensure!(record.contains("ori_img_shape"), "`resolution` needs `ori_img_shape`; run save-image-shape first");
		let sizes = record.image_sizes("img")?;
		let ori = metadata(&record, "ori_img_shape", sizes.len())?;

		let mut resolution = Vec::with_capacity(sizes.len());
		let mut aspect_ratio = Vec::with_capacity(sizes.len());
		for (i, &(h, w)) in sizes.items.iter().enumerate() {
			resolution.push(ori.items[i].iter().map(|&v| v as f64).collect());
			aspect_ratio.push(h as f64 / w as f64);
		}
		record.put_vectors("resolution", Batched {
			items: resolution,
			listed: sizes.listed
		});
		record.put_scalars("aspect_ratio", Batched {
			items: aspect_ratio,
			listed: sizes.listed
		});
		Ok(record)
	}
}

fn metadata(record: &Record, key: &str, len: usize) -> anyhow::Result<Batched<Vec<u32>>> {
	let coords = record.coords(key)?;
	anyhow::ensure!(coords.len() == len, "field `{key}` has {} entries, but `img` has {len} elements", coords.len());
	Ok(coords)
}
