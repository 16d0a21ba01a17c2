//! The per-sample record flowing through a transform pipeline.

use std::collections::HashMap;

use image::DynamicImage;
use ndarray::Array3;

/// A single value stored in a [`Record`] field.
///
/// Every kind comes in a scalar and a list flavor; a record is in *batch mode* when its `img`
/// field is list-valued, and transforms keep all paired fields list-valued of equal length in
/// that mode.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Value {
	/// A single image.
	Image(DynamicImage),
	/// An ordered batch of images.
	ImageList(Vec<DynamicImage>),
	/// A single caption.
	Text(String),
	/// A batch of captions.
	TextList(Vec<String>),
	/// Pixel geometry — an `[h, w]` shape or `[y, x]` offset.
	Coords(Vec<u32>),
	/// A batch of pixel geometry entries.
	CoordsList(Vec<Vec<u32>>),
	/// A conditioning vector (time ids, micro conds, resolution).
	Vector(Vec<f64>),
	/// A batch of conditioning vectors.
	VectorList(Vec<Vec<f64>>),
	/// A single number (aspect ratio).
	Scalar(f64),
	/// A batch of numbers.
	ScalarList(Vec<f64>),
	/// Packed CHW pixel data.
	Tensor(Array3<f32>),
	/// A batch of packed CHW pixel data.
	TensorList(Vec<Array3<f32>>)
}

impl From<DynamicImage> for Value {
	fn from(value: DynamicImage) -> Self {
		Self::Image(value)
	}
}

impl From<Vec<DynamicImage>> for Value {
	fn from(value: Vec<DynamicImage>) -> Self {
		Self::ImageList(value)
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

impl<'s> From<&'s str> for Value {
	fn from(value: &'s str) -> Self {
		Self::Text(value.to_string())
	}
}

impl From<Vec<String>> for Value {
	fn from(value: Vec<String>) -> Self {
		Self::TextList(value)
	}
}

impl From<Array3<f32>> for Value {
	fn from(value: Array3<f32>) -> Self {
		Self::Tensor(value)
	}
}

/// A uniform batch-of-one-or-more view over a scalar-or-list field.
///
/// Transforms only ever implement per-element logic; [`Record`]'s typed accessors normalize a
/// field into a `Batched` on entry and denormalize it back to its original shape on exit.
/// `listed` records whether the field was list-valued, so a single image in yields a single
/// image (and de-listed metadata) out.
#[derive(Debug, Clone)]
pub struct Batched<T> {
	/// The elements of the batch; a scalar field becomes a batch of one.
	pub items: Vec<T>,
	/// Whether the source field was list-valued.
	pub listed: bool
}

impl<T> Batched<T> {
	/// Wraps a single element as a batch of one.
	pub fn one(item: T) -> Self {
		Self { items: vec![item], listed: false }
	}

	/// The number of elements in the batch.
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Whether the batch holds no elements.
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

macro_rules! unbatch {
	($batched: expr, $scalar: path, $list: path) => {{
		let batched = $batched;
		if batched.listed {
			$list(batched.items)
		} else {
			debug_assert_eq!(batched.items.len(), 1);
			match batched.items.into_iter().next() {
				Some(item) => $scalar(item),
				None => $list(Vec::new())
			}
		}
	}};
}

/// The per-sample mapping of named fields passed through a pipeline.
///
/// An upstream data source creates a fresh record per sample (at least `img` and `text`,
/// optionally `condition_img` and `mask`); each transform reads some fields and writes or
/// updates others. Transforms never rename or remove fields they did not produce.
#[derive(Debug, Clone, Default)]
pub struct Record {
	fields: HashMap<String, Value>
}

impl Record {
	/// Creates an empty record.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `value` under `key`, replacing any previous value.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.fields.insert(key.into(), value.into());
	}

	/// Returns the value stored under `key`, if any.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.fields.get(key)
	}

	/// Removes and returns the value stored under `key`, if any.
	pub fn take(&mut self, key: &str) -> Option<Value> {
		self.fields.remove(key)
	}

	/// Whether a value is stored under `key`.
	pub fn contains(&self, key: &str) -> bool {
		self.fields.contains_key(key)
	}

	/// The names of all stored fields, in no particular order.
	pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
		self.fields.keys().map(String::as_str)
	}

	/// Whether the record is in batch mode, i.e. its `img` field is list-valued.
	pub fn is_batch(&self) -> anyhow::Result<bool> {
		match self.fields.get("img") {
			Some(Value::Image(_)) => Ok(false),
			Some(Value::ImageList(_)) => Ok(true),
			Some(_) => anyhow::bail!("field `img` is not image-valued"),
			None => anyhow::bail!("record is missing field `img`")
		}
	}

	/// The `(height, width)` of each image under `key`, without cloning pixel data.
	pub fn image_sizes(&self, key: &str) -> anyhow::Result<Batched<(u32, u32)>> {
		match self.fields.get(key) {
			Some(Value::Image(img)) => Ok(Batched::one((img.height(), img.width()))),
			Some(Value::ImageList(imgs)) => Ok(Batched {
				items: imgs.iter().map(|img| (img.height(), img.width())).collect(),
				listed: true
			}),
			Some(_) => anyhow::bail!("field `{key}` is not image-valued"),
			None => anyhow::bail!("record is missing field `{key}`")
		}
	}

	/// Removes the image field `key` and returns it as a batch.
	pub fn take_images(&mut self, key: &str) -> anyhow::Result<Batched<DynamicImage>> {
		match self.fields.remove(key) {
			Some(Value::Image(img)) => Ok(Batched::one(img)),
			Some(Value::ImageList(imgs)) => Ok(Batched { items: imgs, listed: true }),
			Some(other) => {
				self.fields.insert(key.to_string(), other);
				anyhow::bail!("field `{key}` is not image-valued")
			}
			None => anyhow::bail!("record is missing field `{key}`")
		}
	}

	/// Stores an image batch under `key`, de-listing batches of one that were not list-valued.
	pub fn put_images(&mut self, key: impl Into<String>, images: Batched<DynamicImage>) {
		self.fields.insert(key.into(), unbatch!(images, Value::Image, Value::ImageList));
	}

	/// Returns a copy of the pixel-geometry field `key` as a batch.
	pub fn coords(&self, key: &str) -> anyhow::Result<Batched<Vec<u32>>> {
		match self.fields.get(key) {
			Some(Value::Coords(coords)) => Ok(Batched::one(coords.clone())),
			Some(Value::CoordsList(coords)) => Ok(Batched { items: coords.clone(), listed: true }),
			Some(_) => anyhow::bail!("field `{key}` is not geometry-valued"),
			None => anyhow::bail!("record is missing field `{key}`")
		}
	}

	/// Stores a pixel-geometry batch under `key`.
	pub fn put_coords(&mut self, key: impl Into<String>, coords: Batched<Vec<u32>>) {
		self.fields.insert(key.into(), unbatch!(coords, Value::Coords, Value::CoordsList));
	}

	/// Removes the text field `key` and returns it as a batch.
	pub fn take_texts(&mut self, key: &str) -> anyhow::Result<Batched<String>> {
		match self.fields.remove(key) {
			Some(Value::Text(text)) => Ok(Batched::one(text)),
			Some(Value::TextList(texts)) => Ok(Batched { items: texts, listed: true }),
			Some(other) => {
				self.fields.insert(key.to_string(), other);
				anyhow::bail!("field `{key}` is not text-valued")
			}
			None => anyhow::bail!("record is missing field `{key}`")
		}
	}

	/// Stores a text batch under `key`.
	pub fn put_texts(&mut self, key: impl Into<String>, texts: Batched<String>) {
		self.fields.insert(key.into(), unbatch!(texts, Value::Text, Value::TextList));
	}

	/// Stores a conditioning-vector batch under `key`.
	pub fn put_vectors(&mut self, key: impl Into<String>, vectors: Batched<Vec<f64>>) {
		self.fields.insert(key.into(), unbatch!(vectors, Value::Vector, Value::VectorList));
	}

	/// Stores a number batch under `key`.
	pub fn put_scalars(&mut self, key: impl Into<String>, scalars: Batched<f64>) {
		self.fields.insert(key.into(), unbatch!(scalars, Value::Scalar, Value::ScalarList));
	}

	/// Removes the tensor field `key` and returns it as a batch.
	pub fn take_tensors(&mut self, key: &str) -> anyhow::Result<Batched<Array3<f32>>> {
		match self.fields.remove(key) {
			Some(Value::Tensor(tensor)) => Ok(Batched::one(tensor)),
			Some(Value::TensorList(tensors)) => Ok(Batched { items: tensors, listed: true }),
			Some(other) => {
				self.fields.insert(key.to_string(), other);
				anyhow::bail!("field `{key}` is not tensor-valued")
			}
			None => anyhow::bail!("record is missing field `{key}`")
		}
	}

	/// Stores a tensor batch under `key`.
	pub fn put_tensors(&mut self, key: impl Into<String>, tensors: Batched<Array3<f32>>) {
		self.fields.insert(key.into(), unbatch!(tensors, Value::Tensor, Value::TensorList));
	}
}

#[cfg(test)]
mod tests {
	use super::{Record, Value};

	#[test]
	fn test_unbatch_shape() {
		let mut record = Record::new();
		record.insert("img", image::DynamicImage::new_rgb8(4, 4));
		record.insert("text", "a fox");

		let imgs = record.take_images("img").unwrap();
		assert!(!imgs.listed);
		assert_eq!(imgs.len(), 1);
		record.put_images("img", imgs);
		assert!(matches!(record.get("img"), Some(Value::Image(_))));

		let mut record = Record::new();
		record.insert("img", vec![image::DynamicImage::new_rgb8(4, 4)]);
		let imgs = record.take_images("img").unwrap();
		assert!(imgs.listed);
		record.put_images("img", imgs);
		assert!(matches!(record.get("img"), Some(Value::ImageList(_))));
	}

	#[test]
	fn test_missing_field() {
		let mut record = Record::new();
		assert!(record.take_images("img").is_err());
		record.insert("img", "not an image");
		assert!(record.take_images("img").is_err());
		// the original value must survive a failed typed take
		assert!(matches!(record.get("img"), Some(Value::Text(_))));
	}
}
