use rand::{thread_rng, Rng};

use super::crop::Components;
use crate::{Batched, Record, Transform};

/// Flips all target fields horizontally with probability `p`, one fresh coin per element.
///
/// The difference from a plain random flip is
/// 1. the coin is shared by every target field of an element, so paired fields stay aligned,
///    and
/// 2. crop metadata recorded by an earlier crop is corrected: a horizontal mirror moves the
///    crop window, so `crop_top_left`'s x-coordinate becomes
///    `before_crop_size.w - crop_bottom_right.x` for flipped elements.
pub struct RandomHorizontalFlip {
	p: f64,
	keys: Vec<String>
}

impl RandomHorizontalFlip {
	/// Creates a horizontal flip with probability `p` over the `keys` fields.
	pub fn new(p: f64, keys: Vec<String>) -> anyhow::Result<Self> {
		anyhow::ensure!((0.0..=1.0).contains(&p), "flip probability must be within [0, 1], got {p}");
		anyhow::ensure!(keys.iter().any(|k| k == "img"), "flip keys must include `img`");
		Ok(Self { p, keys })
	}
}

impl Transform for RandomHorizontalFlip {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		let mut components = Components::take(&mut record, &self.keys)?;
		let crop_metadata = if record.contains("crop_top_left") {
			let top_left = record.coords("crop_top_left")?;
			let bottom_right = record.coords("crop_bottom_right")?;
			let before = record.coords("before_crop_size")?;
			for (key, coords) in [("crop_top_left", &top_left), ("crop_bottom_right", &bottom_right), ("before_crop_size", &before)] {
				anyhow::ensure!(
					coords.len() == components.len(),
					"field `{key}` has {} entries, but `img` has {} elements",
					coords.len(),
					components.len()
				);
				anyhow::ensure!(coords.items.iter().all(|c| c.len() == 2), "field `{key}` entries must be [y, x] pairs");
			}
			Some((top_left, bottom_right, before))
		} else {
			None
		};

		let mut rng = thread_rng();
		let mut new_top_left = Vec::with_capacity(components.len());
		for i in 0..components.len() {
			if rng.gen::<f64>() < self.p {
				components.ensure_same_size(i)?;
				for batch in components.batches.iter_mut() {
					batch.items[i] = batch.items[i].fliph();
				}
				if let Some((top_left, bottom_right, before)) = &crop_metadata {
					anyhow::ensure!(
						bottom_right.items[i][1] <= before.items[i][1],
						"inconsistent crop metadata: `crop_bottom_right` exceeds `before_crop_size`"
					);
					new_top_left.push(vec![top_left.items[i][0], before.items[i][1] - bottom_right.items[i][1]]);
				}
			} else if let Some((top_left, ..)) = &crop_metadata {
				new_top_left.push(top_left.items[i].clone());
			}
		}

		let listed = components.listed;
		components.put(&mut record);
		if crop_metadata.is_some() {
			record.put_coords("crop_top_left", Batched { items: new_top_left, listed });
		}
		Ok(record)
	}
}
