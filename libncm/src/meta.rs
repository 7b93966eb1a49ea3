use base64::prelude::*;
use block_modes::block_padding::{Padding, Pkcs7};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cipher::{self, guess_padding, ContextState, AES_BLOCK_SIZE};
use crate::error::{FormatError, NcmError, Result};
use crate::format::{
    meta_key, META_HINT, META_SCHEMA, META_XOR, OVERWRITE_KEY, OVERWRITE_MARKER, OVERWRITE_MARKER_KEY,
};

/// Vendor metadata of a container.
///
/// The JSON text is kept verbatim next to its parsed form, so a rewrite
/// starts from exactly what the vendor wrote instead of a re-serialized copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetadata {
    raw: String,
    value: Value,
}

impl ParsedMetadata {
    /// Parse `raw`; only a JSON object is accepted.
    pub fn from_raw(raw: String) -> std::result::Result<Self, String> {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => Ok(ParsedMetadata { raw, value }),
            Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Metadata of a container whose metadata section is empty
    pub fn empty() -> Self {
        ParsedMetadata {
            raw: "{}".to_owned(),
            value: Value::Object(Map::new()),
        }
    }

    /// The JSON text as stored in the container
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed vendor object, `overwrite` key included
    pub fn vendor(&self) -> &Value {
        &self.value
    }

    pub fn overwrite(&self) -> Option<&Map<String, Value>> {
        self.value.get(OVERWRITE_KEY).and_then(Value::as_object)
    }

    /// Vendor values with the overwrite object layered on top.
    pub fn merged(&self) -> Value {
        let mut merged = match &self.value {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        merged.shift_remove(OVERWRITE_KEY);
        if let Some(overwrite) = self.overwrite() {
            for (key, value) in overwrite {
                if key != OVERWRITE_MARKER_KEY {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Value::Object(merged)
    }

    pub fn info(&self) -> MusicInfo {
        MusicInfo::from_json(&self.value)
    }

    /// Audio format hint ("mp3", "flac"), overwrite first
    pub fn format(&self) -> Option<String> {
        self.info().format
    }

    /// JSON text with `overwrite` replaced, keeping every other vendor key in place.
    ///
    /// An empty `overwrite` removes the key instead.
    pub(crate) fn to_json_with_overwrite(&self, overwrite: &Map<String, Value>) -> Result<String> {
        let mut live: Value = serde_json::from_str(&self.raw).map_err(|_| NcmError::MetadataUnavailable)?;
        let object = live.as_object_mut().ok_or(NcmError::MetadataUnavailable)?;
        object.shift_remove(OVERWRITE_KEY);
        if !overwrite.is_empty() {
            let mut overwrite = overwrite.clone();
            overwrite.insert(OVERWRITE_MARKER_KEY.to_owned(), Value::from(OVERWRITE_MARKER));
            object.insert(OVERWRITE_KEY.to_owned(), Value::Object(overwrite));
        }
        serde_json::to_string(&live).map_err(|_| NcmError::MetadataUnavailable)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed view over the vendor fields, with overwrite values taking precedence.
///
/// Extraction is lenient: a field with an unexpected type is skipped, ids may
/// be numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicInfo {
    pub music_id: Option<u64>,
    pub music_name: Option<String>,
    pub album_id: Option<u64>,
    pub album: Option<String>,
    pub album_pic_doc_id: Option<String>,
    pub album_pic: Option<String>,
    pub mp3_doc_id: Option<String>,
    pub mv_id: Option<u64>,
    pub bitrate: Option<u64>,
    pub duration: Option<u64>,
    pub format: Option<String>,
    pub alias: Vec<String>,
    pub trans_names: Vec<String>,
    /// (name, id) pairs
    pub artist: Vec<(String, u64)>,
}

impl MusicInfo {
    pub fn from_json(json: &Value) -> Self {
        let mut info = MusicInfo::default();
        info.update(json);
        if let Some(overwrite) = json.get(OVERWRITE_KEY) {
            info.update(overwrite);
        }
        info
    }

    fn update(&mut self, json: &Value) {
        let object = match json.as_object() {
            Some(object) => object,
            None => return,
        };
        let id = |key: &str| object.get(key).and_then(weak_id);
        let string = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_owned);
        let strings = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_str).map(str::to_owned).collect::<Vec<_>>())
        };

        macro_rules! layer {
            ($field:expr, $value:expr) => {
                if let Some(v) = $value {
                    $field = Some(v);
                }
            };
        }
        layer!(self.music_id, id("musicId"));
        layer!(self.music_name, string("musicName"));
        layer!(self.album_id, id("albumId"));
        layer!(self.album, string("album"));
        layer!(self.album_pic_doc_id, string("albumPicDocId"));
        layer!(self.album_pic, string("albumPic"));
        layer!(self.mp3_doc_id, string("mp3DocId"));
        layer!(self.mv_id, id("mvId"));
        layer!(self.bitrate, id("bitrate"));
        layer!(self.duration, id("duration"));
        layer!(self.format, string("format"));

        if let Some(alias) = strings("alias") {
            self.alias = alias;
        }
        if let Some(trans_names) = strings("transNames") {
            self.trans_names = trans_names;
        }
        if let Some(artists) = object.get("artist").and_then(Value::as_array) {
            self.artist = artists
                .iter()
                .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([name, id]) => Some((name.as_str()?.to_owned(), weak_id(id)?)),
                    _ => None,
                })
                .collect();
        }
    }
}

fn weak_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Turn the raw metadata section into the bytes of its JSON text.
pub(crate) fn decode_meta_blob(mut blob: Vec<u8>) -> Result<Vec<u8>> {
    for byte in &mut blob {
        *byte ^= META_XOR;
    }
    if !blob.starts_with(META_HINT) {
        return Err(FormatError::MetaHintMismatch.into());
    }
    let encrypted = BASE64_STANDARD
        .decode(&blob[META_HINT.len()..])
        .map_err(FormatError::Base64)?;
    if encrypted.is_empty() {
        return Err(FormatError::MetaSchemaMismatch.into());
    }
    let mut decrypted = cipher::ecb_decrypt(&meta_key()?, &encrypted)?;
    let padding = guess_padding(&decrypted);
    decrypted.truncate(decrypted.len() - padding);
    if !decrypted.starts_with(META_SCHEMA) {
        return Err(FormatError::MetaSchemaMismatch.into());
    }
    decrypted.drain(..META_SCHEMA.len());
    Ok(decrypted)
}

/// Inverse of [`decode_meta_blob`].
pub(crate) fn encode_meta_blob(json: &str) -> Result<Vec<u8>> {
    let message_len = META_SCHEMA.len() + json.len();
    let mut plain = Vec::with_capacity(message_len + AES_BLOCK_SIZE);
    plain.extend_from_slice(META_SCHEMA);
    plain.extend_from_slice(json.as_bytes());
    plain.resize(message_len + AES_BLOCK_SIZE, 0);
    let padded_len = Pkcs7::pad(&mut plain, message_len, AES_BLOCK_SIZE)
        .map_err(|_| NcmError::crypto("padding failed", ContextState::Idle))?
        .len();
    plain.truncate(padded_len);

    let encrypted = cipher::ecb_encrypt(&meta_key()?, &plain)?;
    let mut blob = META_HINT.to_vec();
    blob.extend_from_slice(BASE64_STANDARD.encode(encrypted).as_bytes());
    for byte in &mut blob {
        *byte ^= META_XOR;
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VENDOR: &str = r#"{"musicId":1234,"musicName":"Song","artist":[["Someone",42],["Other","7"]],"albumId":99,"album":"Record","bitrate":320000,"duration":215000,"alias":["a"],"transNames":[],"format":"flac","zUnknown":{"nested":true}}"#;

    #[test]
    fn raw_text_is_kept_verbatim() {
        let meta = ParsedMetadata::from_raw(VENDOR.to_owned()).unwrap();
        assert_eq!(meta.raw(), VENDOR);
        assert!(meta.overwrite().is_none());
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(ParsedMetadata::from_raw("[1,2]".to_owned()).is_err());
        assert!(ParsedMetadata::from_raw("{broken".to_owned()).is_err());
    }

    #[test]
    fn info_reads_vendor_fields_leniently() {
        let meta = ParsedMetadata::from_raw(VENDOR.to_owned()).unwrap();
        let info = meta.info();
        assert_eq!(info.music_id, Some(1234));
        assert_eq!(info.music_name.as_deref(), Some("Song"));
        assert_eq!(info.album_id, Some(99));
        assert_eq!(info.format.as_deref(), Some("flac"));
        assert_eq!(info.alias, vec!["a".to_owned()]);
        assert_eq!(info.artist, vec![("Someone".to_owned(), 42), ("Other".to_owned(), 7)]);
        assert_eq!(info.mv_id, None);
    }

    #[test]
    fn overwrite_layers_over_vendor_values() {
        let meta = ParsedMetadata::from_raw(VENDOR.to_owned()).unwrap();
        let mut edit = Map::new();
        edit.insert("musicName".to_owned(), json!("Edited"));
        edit.insert("alias".to_owned(), json!(["b", "c"]));
        let text = meta.to_json_with_overwrite(&edit).unwrap();
        let edited = ParsedMetadata::from_raw(text).unwrap();

        let info = edited.info();
        assert_eq!(info.music_name.as_deref(), Some("Edited"));
        assert_eq!(info.alias, vec!["b".to_owned(), "c".to_owned()]);
        assert_eq!(info.album.as_deref(), Some("Record"));

        let merged = edited.merged();
        assert_eq!(merged["musicName"], json!("Edited"));
        assert_eq!(merged["musicId"], json!(1234));
        assert!(merged.get(OVERWRITE_KEY).is_none());
        assert!(merged.get(OVERWRITE_MARKER_KEY).is_none());
        assert_eq!(edited.overwrite().unwrap()[OVERWRITE_MARKER_KEY], json!(OVERWRITE_MARKER));
    }

    #[test]
    fn vendor_key_order_survives_overwrite() {
        let meta = ParsedMetadata::from_raw(VENDOR.to_owned()).unwrap();
        let mut edit = Map::new();
        edit.insert("album".to_owned(), json!("X"));
        let text = meta.to_json_with_overwrite(&edit).unwrap();
        let vendor_part = &VENDOR[..VENDOR.len() - 1];
        assert!(text.starts_with(vendor_part), "{}", text);
        assert!(text[vendor_part.len()..].starts_with(r#","overwrite":{"album":"X""#));
    }

    #[test]
    fn empty_overwrite_removes_key() {
        let with = ParsedMetadata::from_raw(r#"{"a":1,"overwrite":{"a":2},"b":3}"#.to_owned()).unwrap();
        let text = with.to_json_with_overwrite(&Map::new()).unwrap();
        assert_eq!(text, r#"{"a":1,"b":3}"#);
    }

    #[test]
    fn blob_roundtrip() {
        let blob = encode_meta_blob(VENDOR).unwrap();
        assert!(blob.iter().all(|b| (b ^ META_XOR).is_ascii()));
        assert_eq!(decode_meta_blob(blob).unwrap(), VENDOR.as_bytes());
    }

    #[test]
    fn blob_without_payload_is_a_format_error() {
        let blob: Vec<u8> = META_HINT.iter().map(|b| b ^ META_XOR).collect();
        assert!(matches!(
            decode_meta_blob(blob),
            Err(NcmError::Format(FormatError::MetaSchemaMismatch))
        ));
    }

    #[test]
    fn music_info_serializes_with_vendor_key_names() {
        let info = ParsedMetadata::from_raw(VENDOR.to_owned()).unwrap().info();
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["musicId"], json!(1234));
        assert_eq!(value["musicName"], json!("Song"));
        assert_eq!(value["transNames"], json!([]));
        assert_eq!(value["artist"], json!([["Someone", 42], ["Other", 7]]));
        assert_eq!(value["mvId"], Value::Null);
    }

    #[test]
    fn blob_with_wrong_hint_is_a_format_error() {
        let mut blob = encode_meta_blob("{}").unwrap();
        blob[0] ^= 0xFF;
        assert!(matches!(
            decode_meta_blob(blob),
            Err(NcmError::Format(FormatError::MetaHintMismatch))
        ));
    }
}
