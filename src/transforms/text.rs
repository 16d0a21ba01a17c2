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

//! Caption transforms: cleanup, dropout and constant suffixes.

use lazy_static::lazy_static;
use percent_encoding::percent_decode_str;
use rand::{thread_rng, Rng};
use regex::Regex;

use crate::{Record, Transform};

lazy_static! {
	static ref PERSON_TAG: Regex = Regex::new(r"<person>").unwrap();
	static ref URL_HTTP: Regex =
		Regex::new(r"\b(?:https?:(?:/{1,3}|[a-zA-Z0-9%])|[a-zA-Z0-9.\-]+\.(?:com|co|ru|net|org|edu|gov|it)[\w/-]*/?)").unwrap();
	static ref URL_WWW: Regex =
		Regex::new(r"\b(?:www:(?:/{1,3}|[a-zA-Z0-9%])|[a-zA-Z0-9.\-]+\.(?:com|co|ru|net|org|edu|gov|it)[\w/-]*/?)").unwrap();
	static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
	static ref HANDLE: Regex = Regex::new(r"@[\w\d]+\b").unwrap();
	// CJK strokes, Katakana phonetic extensions, enclosed CJK letters & months, CJK
	// compatibility, unified ideographs (+ extension A) and Yijing hexagram symbols
	static ref CJK: Regex = Regex::new(r"[\u{31c0}-\u{31ff}\u{3200}-\u{33ff}\u{3400}-\u{4dff}\u{4e00}-\u{9fff}]+").unwrap();
	// all varieties of dash, unified before the hyphen-count heuristic below
	static ref DASHES: Regex = Regex::new(
		r"[\u{002d}\u{058a}\u{05be}\u{1400}\u{1806}\u{2010}-\u{2015}\u{2e17}\u{2e1a}\u{2e3a}\u{2e3b}\u{2e40}\u{301c}\u{3030}\u{30a0}\u{fe31}\u{fe32}\u{fe58}\u{fe63}\u{ff0d}]+"
	)
	.unwrap();
	static ref DOUBLE_QUOTES: Regex = Regex::new("[`´«»“”¨]").unwrap();
	static ref SINGLE_QUOTES: Regex = Regex::new("[‘’]").unwrap();
	static ref QUOT_ENTITY: Regex = Regex::new(r"&quot;?").unwrap();
	static ref AMP_ENTITY: Regex = Regex::new(r"&amp").unwrap();
	static ref IP_ADDRESS: Regex = Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").unwrap();
	static ref ARTICLE_ID: Regex = Regex::new(r"\d:\d\d\s+$").unwrap();
	static ref LITERAL_NEWLINE: Regex = Regex::new(r"\\n").unwrap();
	static ref SHORT_HASH: Regex = Regex::new(r"#\d{1,3}\b").unwrap();
	static ref LONG_HASH: Regex = Regex::new(r"#\d{5,}\b").unwrap();
	static ref LONG_NUMBER: Regex = Regex::new(r"\b\d{6,}\b").unwrap();
	static ref FILENAME: Regex = Regex::new(r"\S+\.(?:png|jpg|jpeg|bmp|webp|eps|pdf|apk|mp4)").unwrap();
	static ref REPEATED_QUOTES: Regex = Regex::new(r#"["']{2,}"#).unwrap();
	static ref REPEATED_DOTS: Regex = Regex::new(r"\.{2,}").unwrap();
	static ref BAD_PUNCT: Regex = Regex::new(r"[#®•©™&@·º½¾¿¡§~)(\]\[}{|\\/*]+").unwrap();
	static ref SPACED_DOT: Regex = Regex::new(r"\s+\.\s+").unwrap();
	static ref HYPHENS: Regex = Regex::new(r"[-_]").unwrap();
	static ref CODE_PREFIXED: Regex = Regex::new(r"\b[a-zA-Z]{1,3}\d{3,15}\b").unwrap();
	static ref CODE_INFIXED: Regex = Regex::new(r"\b[a-zA-Z]+\d+[a-zA-Z]+\b").unwrap();
	static ref CODE_WRAPPED: Regex = Regex::new(r"\b\d+[a-zA-Z]+\d+\b").unwrap();
	static ref SHIPPING: Regex = Regex::new(r"(?:worldwide\s+)?(?:free\s+)?shipping").unwrap();
	static ref DOWNLOAD: Regex = Regex::new(r"(?:free\s)?download(?:\sfree)?").unwrap();
	static ref CLICK: Regex = Regex::new(r"\bclick\b\s(?:for|on)\s\w+").unwrap();
	static ref FILETYPE_WORD: Regex = Regex::new(r"\b(?:png|jpg|jpeg|bmp|webp|eps|pdf|apk|mp4)(?:\simages?)?").unwrap();
	static ref PAGE_NUMBER: Regex = Regex::new(r"\bpage\s+\d+\b").unwrap();
	static ref CODE_MIXED: Regex = Regex::new(r"\b\d*[a-zA-Z]+\d+[a-zA-Z]+\d+[a-zA-Z\d]*\b").unwrap();
	static ref DIMENSIONS: Regex = Regex::new(r"\b\d+\.?\d*[xх×]\d+\.?\d*\b").unwrap();
	static ref COLON_SPACING: Regex = Regex::new(r"\b\s+:\s+").unwrap();
	static ref PUNCT_SPACING: Regex = Regex::new(r"(\D[,./])\b").unwrap();
	static ref DASH_RUNS: Regex = Regex::new(r"-{2,}").unwrap();
	static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
	static ref SURROUNDING_QUOTES: Regex = Regex::new(r#"^["']([\w\W]+)["']$"#).unwrap();
	static ref LEADING_PUNCT: Regex = Regex::new(r"^['_,\-:;]+").unwrap();
	static ref TRAILING_PUNCT: Regex = Regex::new(r"['_,\-:+]+$").unwrap();
	static ref DOTTED_TOKEN: Regex = Regex::new(r"^\.\S+$").unwrap();
}

fn unquote_plus(caption: &str) -> String {
	let unplussed = caption.replace('+', " ");
	percent_decode_str(&unplussed).decode_utf8_lossy().into_owned()
}

fn unescape_entities(caption: &str) -> String {
	caption
		.replace("&quot;", "\"")
		.replace("&apos;", "'")
		.replace("&#39;", "'")
		.replace("&nbsp;", " ")
		.replace("&lt;", "<")
		.replace("&gt;", ">")
		.replace("&amp;", "&")
}

/// Normalizes captions into a canonical form.
///
/// The full cleanup applies a fixed, ordered sequence of rewrite rules: URL/`www` stripping,
/// HTML-tag stripping, `@handle` stripping, CJK-block stripping, dash/quote unification,
/// entity unescaping (twice), hash/ID/filename stripping, boilerplate phrase stripping
/// (shipping/download/click/page notices), alphanumeric-code stripping, whitespace collapsing
/// and edge trimming. The order is load-bearing — e.g. dash unification must run before the
/// "more than 3 hyphens left" heuristic that turns hyphenated filenames into words. Cleaning
/// is a fixed point: re-cleaning cleaned output changes nothing.
///
/// With `clean_caption` disabled, captions are only lowercased and trimmed.
pub struct CleanCaption {
	keys: Vec<String>,
	clean_caption: bool
}

impl CleanCaption {
	/// Creates a caption cleaner over the `keys` text fields.
	pub fn new(keys: Vec<String>, clean_caption: bool) -> anyhow::Result<Self> {
		anyhow::ensure!(!keys.is_empty(), "caption cleaning needs at least one target field");
		Ok(Self { keys, clean_caption })
	}

	/// Runs the full rewrite-rule sequence over a single caption.
	pub fn clean(caption: &str) -> String {
		let mut caption = unquote_plus(caption).trim().to_lowercase();
		caption = PERSON_TAG.replace_all(&caption, "person").into_owned();
		caption = URL_HTTP.replace_all(&caption, "").into_owned();
		caption = URL_WWW.replace_all(&caption, "").into_owned();
		caption = HTML_TAG.replace_all(&caption, "").into_owned();
		caption = HANDLE.replace_all(&caption, "").into_owned();
		caption = CJK.replace_all(&caption, "").into_owned();
		caption = DASHES.replace_all(&caption, "-").into_owned();
		caption = DOUBLE_QUOTES.replace_all(&caption, "\"").into_owned();
		caption = SINGLE_QUOTES.replace_all(&caption, "'").into_owned();
		caption = QUOT_ENTITY.replace_all(&caption, "").into_owned();
		caption = AMP_ENTITY.replace_all(&caption, "").into_owned();
		caption = IP_ADDRESS.replace_all(&caption, " ").into_owned();
		caption = ARTICLE_ID.replace_all(&caption, "").into_owned();
		caption = LITERAL_NEWLINE.replace_all(&caption, " ").into_owned();
		caption = SHORT_HASH.replace_all(&caption, "").into_owned();
		caption = LONG_HASH.replace_all(&caption, "").into_owned();
		caption = LONG_NUMBER.replace_all(&caption, "").into_owned();
		caption = FILENAME.replace_all(&caption, "").into_owned();
		caption = REPEATED_QUOTES.replace_all(&caption, "\"").into_owned();
		caption = REPEATED_DOTS.replace_all(&caption, " ").into_owned();
		caption = BAD_PUNCT.replace_all(&caption, " ").into_owned();
		caption = SPACED_DOT.replace_all(&caption, " ").into_owned();
		// this-is-my-cute-cat / this_is_my_cute_cat
		if HYPHENS.find_iter(&caption).count() > 3 {
			caption = HYPHENS.replace_all(&caption, " ").into_owned();
		}
		caption = unescape_entities(&unescape_entities(&caption));
		caption = CODE_PREFIXED.replace_all(&caption, "").into_owned();
		caption = CODE_INFIXED.replace_all(&caption, "").into_owned();
		caption = CODE_WRAPPED.replace_all(&caption, "").into_owned();
		caption = SHIPPING.replace_all(&caption, "").into_owned();
		caption = DOWNLOAD.replace_all(&caption, "").into_owned();
		caption = CLICK.replace_all(&caption, "").into_owned();
		caption = FILETYPE_WORD.replace_all(&caption, "").into_owned();
		caption = PAGE_NUMBER.replace_all(&caption, "").into_owned();
		caption = CODE_MIXED.replace_all(&caption, " ").into_owned();
		caption = DIMENSIONS.replace_all(&caption, "").into_owned();
		caption = COLON_SPACING.replace_all(&caption, ": ").into_owned();
		caption = PUNCT_SPACING.replace_all(&caption, "${1} ").into_owned();
		caption = DASH_RUNS.replace_all(&caption, "-").into_owned();
		caption = WHITESPACE.replace_all(&caption, " ").into_owned();
		caption = caption.trim().to_string();
		caption = SURROUNDING_QUOTES.replace_all(&caption, "${1}").into_owned();
		caption = LEADING_PUNCT.replace_all(&caption, "").into_owned();
		caption = TRAILING_PUNCT.replace_all(&caption, "").into_owned();
		caption = DOTTED_TOKEN.replace_all(&caption, "").into_owned();
		caption.trim().to_string()
	}
}

impl Transform for CleanCaption {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		for key in &self.keys {
			let mut texts = record.take_texts(key)?;
			for text in texts.items.iter_mut() {
				*text = if self.clean_caption { Self::clean(text) } else { text.trim().to_lowercase() };
			}
			record.put_texts(key.clone(), texts);
		}
		Ok(record)
	}
}

/// Empties the target text fields with probability `p`, once per record.
///
/// Dropping captions during training lets classifier-free guidance learn the unconditional
/// branch. Field shape is preserved: every element of a list-valued field is emptied.
pub struct RandomTextDrop {
	p: f64,
	keys: Vec<String>
}

impl RandomTextDrop {
	/// Creates a caption dropout with probability `p` over the `keys` text fields.
	pub fn new(p: f64, keys: Vec<String>) -> anyhow::Result<Self> {
		anyhow::ensure!((0.0..=1.0).contains(&p), "drop probability must be within [0, 1], got {p}");
		anyhow::ensure!(!keys.is_empty(), "caption dropout needs at least one target field");
		Ok(Self { p, keys })
	}
}

impl Transform for RandomTextDrop {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		if thread_rng().gen::<f64>() < self.p {
			for key in &self.keys {
				let mut texts = record.take_texts(key)?;
				for text in texts.items.iter_mut() {
					text.clear();
				}
				record.put_texts(key.clone(), texts);
			}
		}
		Ok(record)
	}
}

/// Appends a constant phrase to every target caption, e.g. `"a dog."` with the constant
/// `"in szn style"` becomes `"a dog. in szn style"`.
pub struct AddConstantCaption {
	constant_caption: String,
	keys: Vec<String>
}

impl AddConstantCaption {
	/// Creates a transform appending `constant_caption` to the `keys` text fields.
	pub fn new(constant_caption: String, keys: Vec<String>) -> anyhow::Result<Self> {
		anyhow::ensure!(!keys.is_empty(), "caption suffixing needs at least one target field");
		Ok(Self { constant_caption, keys })
	}
}

impl Transform for AddConstantCaption {
	fn transform(&self, mut record: Record) -> anyhow::Result<Record> {
		for key in &self.keys {
			let mut texts = record.take_texts(key)?;
			for text in texts.items.iter_mut() {
				text.push(' ');
				text.push_str(&self.constant_caption);
			}
			record.put_texts(key.clone(), texts);
		}
		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	use super::CleanCaption;

	#[test]
	fn test_clean_caption() {
		assert_eq!(CleanCaption::clean("Check http://x.co <b>NOW</b> free-shipping-now!!"), "check now free-now!!");
		assert_eq!(CleanCaption::clean("this-is-my-cute-cat"), "this is my cute cat");
		assert_eq!(CleanCaption::clean("IMG_1234.png 123456 photo"), "photo");
		assert_eq!(CleanCaption::clean("@user123 “Nice” 猫 photo"), "\"nice\" photo");
		assert_eq!(CleanCaption::clean("photo%20of+a%20fox"), "photo of a fox");
	}

	#[test]
	fn test_hyphen_heuristic_threshold() {
		// three hyphens stay; a fourth flips them all to spaces
		assert_eq!(CleanCaption::clean("one-two-three-four"), "one-two-three-four");
		assert_eq!(CleanCaption::clean("one-two-three-four-five"), "one two three four five");
	}

	#[test]
	fn test_clean_caption_is_fixed_point() {
		for caption in [
			"Check http://x.co <b>NOW</b> free-shipping-now!!",
			"worldwide  free shipping, page 3, j2d1a2a",
			"“quoted” --- caption ... with   1.2.3.4 noise"
		] {
			let once = CleanCaption::clean(caption);
			assert_eq!(CleanCaption::clean(&once), once, "not a fixed point for {caption:?}");
		}
	}
}
