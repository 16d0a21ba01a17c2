use approx::assert_abs_diff_eq;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use pyke_augment::{
	CenterCrop, CleanCaption, Pipeline, RandomCrop, RandomHorizontalFlip, Record, Transform, TransformConfig, Value
};

/// An image with a unique color at every pixel, so any geometric shuffle is detectable.
fn gradient(width: u32, height: u32) -> DynamicImage {
	DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8])))
}

fn keys(names: &[&str]) -> Vec<String> {
	names.iter().map(|name| name.to_string()).collect()
}

fn coords(record: &Record, key: &str) -> Vec<u32> {
	match record.get(key) {
		Some(Value::Coords(coords)) => coords.clone(),
		other => panic!("field `{key}` is not geometry-valued: {other:?}")
	}
}

fn coords_list(record: &Record, key: &str) -> Vec<Vec<u32>> {
	match record.get(key) {
		Some(Value::CoordsList(coords)) => coords.clone(),
		other => panic!("field `{key}` is not a geometry list: {other:?}")
	}
}

fn vector(record: &Record, key: &str) -> Vec<f64> {
	match record.get(key) {
		Some(Value::Vector(vector)) => vector.clone(),
		other => panic!("field `{key}` is not vector-valued: {other:?}")
	}
}

fn raw_pixels(record: &Record, key: &str) -> Vec<u8> {
	match record.get(key) {
		Some(Value::Image(img)) => img.to_rgb8().into_raw(),
		other => panic!("field `{key}` is not image-valued: {other:?}")
	}
}

#[test]
fn test_random_crop_pairs_fields() {
	// a second spatially-aligned field must receive the exact same crop window as `img`
	for _ in 0..10 {
		let mut record = Record::new();
		record.insert("img", gradient(40, 30));
		record.insert("depth", gradient(40, 30));
		let record = RandomCrop::new(12, keys(&["img", "depth"]), true).unwrap().transform(record).unwrap();

		let top_left = coords(&record, "crop_top_left");
		let window = gradient(40, 30).crop_imm(top_left[1], top_left[0], 12, 12).to_rgb8().into_raw();
		assert_eq!(raw_pixels(&record, "img"), window);
		assert_eq!(raw_pixels(&record, "depth"), window);
	}
}

#[test]
fn test_flip_pairs_fields() {
	let mut record = Record::new();
	record.insert("img", gradient(24, 16));
	record.insert("condition_img", gradient(24, 16));
	let record = RandomHorizontalFlip::new(1.0, keys(&["img", "condition_img"]))
		.unwrap()
		.transform(record)
		.unwrap();

	let mirrored = gradient(24, 16).fliph().to_rgb8().into_raw();
	assert_eq!(raw_pixels(&record, "img"), mirrored);
	assert_eq!(raw_pixels(&record, "condition_img"), mirrored);
}

#[test]
fn test_crop_metadata_round_trip() {
	// crop_top_left + [h, w] == crop_bottom_right, for every element, every draw
	for _ in 0..10 {
		let mut record = Record::new();
		record.insert("img", vec![gradient(40, 30), gradient(40, 30), gradient(40, 30)]);
		let record = RandomCrop::new([10, 17], keys(&["img"]), true).unwrap().transform(record).unwrap();

		let top_left = coords_list(&record, "crop_top_left");
		let bottom_right = coords_list(&record, "crop_bottom_right");
		let before = coords_list(&record, "before_crop_size");
		for i in 0..3 {
			assert_eq!(bottom_right[i], vec![top_left[i][0] + 10, top_left[i][1] + 17]);
			assert_eq!(before[i], vec![30, 40]);
		}
	}
}

#[test]
fn test_center_crop_offsets() {
	let mut record = Record::new();
	record.insert("img", gradient(9, 11));
	let record = CenterCrop::new(4, keys(&["img"])).unwrap().transform(record).unwrap();

	// (11 - 4) / 2 and (9 - 4) / 2, rounded half away from zero
	assert_eq!(coords(&record, "crop_top_left"), vec![4, 3]);
	assert_eq!(coords(&record, "crop_bottom_right"), vec![8, 7]);
	assert_eq!(coords(&record, "before_crop_size"), vec![11, 9]);
}

#[test]
fn test_flip_corrects_crop_metadata() {
	let mut record = Record::new();
	record.insert("img", gradient(12, 10));
	let record = RandomCrop::new([4, 6], keys(&["img"]), true).unwrap().transform(record).unwrap();
	let top_left = coords(&record, "crop_top_left");
	let bottom_right = coords(&record, "crop_bottom_right");
	let before = coords(&record, "before_crop_size");

	let record = RandomHorizontalFlip::new(1.0, keys(&["img"])).unwrap().transform(record).unwrap();
	let flipped_top_left = coords(&record, "crop_top_left");
	assert_eq!(flipped_top_left[0], top_left[0]);
	assert_eq!(flipped_top_left[1], before[1] - bottom_right[1]);
	// the other crop fields are consumed but never rewritten
	assert_eq!(coords(&record, "crop_bottom_right"), bottom_right);
	assert_eq!(coords(&record, "before_crop_size"), before);
}

#[test]
fn test_batch_of_one_matches_single() {
	let pipeline = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(
			r#"[
				{ "type": "save-image-shape" },
				{ "type": "center-crop", "size": 8 },
				{ "type": "compute-time-ids" },
				{ "type": "compute-micro-conds" },
				{ "type": "compute-pix-art-img-info" }
			]"#
		)
		.unwrap()
	)
	.unwrap();

	let mut single = Record::new();
	single.insert("img", gradient(14, 10));
	let single = pipeline.apply(single).unwrap();

	let mut batch = Record::new();
	batch.insert("img", vec![gradient(14, 10)]);
	let batch = pipeline.apply(batch).unwrap();

	assert_eq!(coords_list(&batch, "ori_img_shape"), vec![coords(&single, "ori_img_shape")]);
	assert_eq!(coords_list(&batch, "crop_top_left"), vec![coords(&single, "crop_top_left")]);
	match (single.get("time_ids"), batch.get("time_ids")) {
		(Some(Value::Vector(a)), Some(Value::VectorList(b))) => {
			assert_eq!(b.len(), 1);
			assert_eq!(&b[0], a);
		}
		other => panic!("unexpected time_ids: {other:?}")
	}
	match (single.get("aspect_ratio"), batch.get("aspect_ratio")) {
		(Some(Value::Scalar(a)), Some(Value::ScalarList(b))) => {
			assert_eq!(b.len(), 1);
			assert_eq!(b[0], *a);
		}
		other => panic!("unexpected aspect_ratio: {other:?}")
	}
	match batch.get("img") {
		Some(Value::ImageList(imgs)) => {
			assert_eq!(imgs.len(), 1);
			assert_eq!(imgs[0].to_rgb8().into_raw(), raw_pixels(&single, "img"));
		}
		other => panic!("unexpected img: {other:?}")
	}
}

#[test]
fn test_conditioning_vectors() {
	let mut record = Record::new();
	record.insert("img", gradient(14, 10));
	let record = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(
			r#"[
				{ "type": "save-image-shape" },
				{ "type": "center-crop", "size": 8 },
				{ "type": "compute-time-ids" },
				{ "type": "compute-micro-conds" },
				{ "type": "compute-pix-art-img-info" }
			]"#
		)
		.unwrap()
	)
	.unwrap()
	.apply(record)
	.unwrap();

	// original shape [10, 14], center crop offset [1, 3], target 8x8
	assert_eq!(vector(&record, "time_ids"), vec![10.0, 14.0, 1.0, 3.0, 8.0, 8.0]);
	// micro conditioning reverses the shape to [w, h] and appends the aesthetic score
	assert_eq!(vector(&record, "micro_conds"), vec![14.0, 10.0, 1.0, 3.0, 6.0]);
	assert_eq!(vector(&record, "resolution"), vec![10.0, 14.0]);
	match record.get("aspect_ratio") {
		Some(Value::Scalar(ratio)) => assert_abs_diff_eq!(*ratio, 1.0, epsilon = 1e-12),
		other => panic!("unexpected aspect_ratio: {other:?}")
	}
}

#[test]
fn test_caption_cleaning_is_stable() {
	let pipeline = Pipeline::from_config(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "clean-caption" }]"#).unwrap()).unwrap();

	let mut record = Record::new();
	record.insert("img", gradient(8, 8));
	record.insert("text", "Check http://x.co <b>NOW</b> free-shipping-now!!");
	let record = pipeline.apply(record).unwrap();
	let cleaned = match record.get("text") {
		Some(Value::Text(text)) => text.clone(),
		other => panic!("unexpected text: {other:?}")
	};
	assert!(!cleaned.contains("http"));
	assert!(!cleaned.contains('<'));
	assert!(!cleaned.contains("shipping"));
	assert!(!cleaned.contains("  "));
	assert_eq!(cleaned, cleaned.to_lowercase());

	// cleaning is a fixed point: a second pass changes nothing
	assert_eq!(CleanCaption::clean(&cleaned), cleaned);
}

#[test]
fn test_bucket_selection_is_deterministic() {
	let pipeline = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "multi-aspect-ratio-resize-center-crop", "sizes": [[64, 64], [32, 64]] }]"#).unwrap()
	)
	.unwrap();

	for _ in 0..10 {
		let mut record = Record::new();
		// ratio 0.6: always lands in the 0.5 bucket
		record.insert("img", gradient(100, 60));
		let record = pipeline.apply(record).unwrap();
		match record.get("img") {
			Some(Value::Image(img)) => assert_eq!((img.height(), img.width()), (32, 64)),
			other => panic!("unexpected img: {other:?}")
		}
	}
}

#[test]
fn test_condition_image_occlusion() {
	for _ in 0..20 {
		let mut record = Record::new();
		record.insert("img", gradient(40, 30));
		record.insert("condition_img", gradient(40, 30));
		let record = RandomCrop::new(16, keys(&["img", "condition_img"]), true)
			.unwrap()
			.transform(record)
			.unwrap();

		let top_left = coords(&record, "crop_top_left");
		let window = gradient(40, 30).crop_imm(top_left[1], top_left[0], 16, 16).to_rgb8();
		assert_eq!(raw_pixels(&record, "img"), window.clone().into_raw());

		// the condition image is the same window, except for white occluded regions
		match record.get("condition_img") {
			Some(Value::Image(img)) => {
				let sketch = img.to_rgb8();
				assert_eq!(sketch.dimensions(), (16, 16));
				for (x, y, pixel) in sketch.enumerate_pixels() {
					assert!(*pixel == Rgb([255, 255, 255]) || *pixel == *window.get_pixel(x, y));
				}
			}
			other => panic!("unexpected condition_img: {other:?}")
		}
	}
}

#[test]
fn test_controlnet_style_pipeline() {
	let pipeline = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(
			r#"[
				{ "type": "resize", "size": 56, "interpolation": "nearest", "keys": ["img", "condition_img"] },
				{ "type": "random-crop", "size": 48, "keys": ["img", "condition_img"] },
				{ "type": "random-horizontal-flip", "p": 0.5, "keys": ["img", "condition_img"] },
				{ "type": "to-tensor", "keys": ["img", "condition_img"] },
				{ "type": "normalize", "mean": [0.5], "std": [0.5] }
			]"#
		)
		.unwrap()
	)
	.unwrap();

	let mut record = Record::new();
	record.insert("img", gradient(100, 80));
	record.insert("condition_img", gradient(100, 80));
	record.insert("text", "Traditional Thai Line Art");
	let record = pipeline.apply(record).unwrap();

	match record.get("img") {
		Some(Value::Tensor(tensor)) => {
			assert_eq!(tensor.shape(), [3, 48, 48]);
			assert!(tensor.iter().all(|v| (-1.0..=1.0).contains(v)));
		}
		other => panic!("unexpected img: {other:?}")
	}
	// the condition image is packed but not normalized
	match record.get("condition_img") {
		Some(Value::Tensor(tensor)) => {
			assert_eq!(tensor.shape(), [3, 48, 48]);
			assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
		}
		other => panic!("unexpected condition_img: {other:?}")
	}
	assert!(matches!(record.get("text"), Some(Value::Text(text)) if text == "Traditional Thai Line Art"));

	// y is untouched by the flip; x may have been mirrored
	let top_left = coords(&record, "crop_top_left");
	let bottom_right = coords(&record, "crop_bottom_right");
	assert_eq!(bottom_right[0], top_left[0] + 48);
	assert_eq!(coords(&record, "before_crop_size"), vec![56, 70]);
}

#[test]
fn test_inpainting_style_pipeline() {
	let pipeline = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(
			r#"[
				{ "type": "to-tensor" },
				{ "type": "mask-to-tensor" },
				{ "type": "get-masked-image" }
			]"#
		)
		.unwrap()
	)
	.unwrap();

	let mut record = Record::new();
	record.insert("img", DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([204, 204, 204]))));
	// left half masked out, right half kept
	record.insert(
		"mask",
		DynamicImage::ImageLuma8(GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 255 } else { 0 }])))
	);
	let record = pipeline.apply(record).unwrap();

	let img = match record.get("img") {
		Some(Value::Tensor(tensor)) => tensor.clone(),
		other => panic!("unexpected img: {other:?}")
	};
	match record.get("masked_image") {
		Some(Value::Tensor(masked)) => {
			assert_eq!(masked.shape(), [3, 16, 16]);
			for ((c, y, x), value) in masked.indexed_iter() {
				if x < 8 {
					assert_eq!(*value, 0.0);
				} else {
					assert_eq!(*value, img[[c, y, x]]);
				}
			}
		}
		other => panic!("unexpected masked_image: {other:?}")
	}
}

#[test]
fn test_text_supplements() {
	let drop = Pipeline::from_config(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "random-text-drop", "p": 1.0 }]"#).unwrap()).unwrap();
	let keep = Pipeline::from_config(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "random-text-drop", "p": 0.0 }]"#).unwrap()).unwrap();
	let suffix = Pipeline::from_config(
		serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "add-constant-caption", "constant-caption": "in szn style" }]"#).unwrap()
	)
	.unwrap();

	let mut record = Record::new();
	record.insert("text", "a dog.");
	let record = drop.apply(record).unwrap();
	assert!(matches!(record.get("text"), Some(Value::Text(text)) if text.is_empty()));

	let mut record = Record::new();
	record.insert("text", "a dog.");
	let record = keep.apply(record).unwrap();
	assert!(matches!(record.get("text"), Some(Value::Text(text)) if text == "a dog."));

	let mut record = Record::new();
	record.insert("text", "a dog.");
	let record = suffix.apply(record).unwrap();
	assert!(matches!(record.get("text"), Some(Value::Text(text)) if text == "a dog. in szn style"));
}

#[test]
fn test_construction_failures() {
	// unknown names fail when the pipeline is built, not when a sample is processed
	let unknown_interpolation: Vec<TransformConfig> =
		serde_json::from_str(r#"[{ "type": "resize", "size": 512, "interpolation": "hamming" }]"#).unwrap();
	assert!(Pipeline::from_config(unknown_interpolation).is_err());

	let unknown_dtype: Vec<TransformConfig> = serde_json::from_str(r#"[{ "type": "to-tensor", "dtype": "float16" }]"#).unwrap();
	assert!(Pipeline::from_config(unknown_dtype).is_err());

	assert!(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "mosaic" }]"#).is_err());
	assert!(RandomHorizontalFlip::new(1.5, keys(&["img"])).is_err());
	assert!(RandomCrop::new(0, keys(&["img"]), true).is_err());
	assert!(RandomCrop::new(16, keys(&["condition_img"]), true).is_err());
}

#[test]
fn test_precondition_failures() {
	// derivation transforms refuse to run before their inputs exist
	let mut record = Record::new();
	record.insert("img", gradient(16, 16));
	let pipeline =
		Pipeline::from_config(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "compute-time-ids" }]"#).unwrap()).unwrap();
	let error = pipeline.apply(record).unwrap_err();
	assert!(error.to_string().contains("ori_img_shape"));

	// paired fields of unequal size are rejected under force_same_size
	let mut record = Record::new();
	record.insert("img", gradient(32, 32));
	record.insert("condition_img", gradient(24, 32));
	let error = RandomCrop::new(16, keys(&["img", "condition_img"]), true)
		.unwrap()
		.transform(record)
		.unwrap_err();
	assert!(error.to_string().contains("size mismatch"));

	// single-image-only transforms reject batches
	let mut record = Record::new();
	record.insert("img", vec![gradient(16, 16)]);
	record.insert("mask", vec![gradient(16, 16)]);
	let pipeline = Pipeline::from_config(serde_json::from_str::<Vec<TransformConfig>>(r#"[{ "type": "mask-to-tensor" }]"#).unwrap()).unwrap();
	assert!(pipeline.apply(record).is_err());
}

#[test]
fn test_crop_larger_than_image_fails() {
	let mut record = Record::new();
	record.insert("img", gradient(8, 8));
	assert!(RandomCrop::new(16, keys(&["img"]), true).unwrap().transform(record).is_err());

	let mut record = Record::new();
	record.insert("img", gradient(8, 8));
	assert!(CenterCrop::new(16, keys(&["img"])).unwrap().transform(record).is_err());
}
