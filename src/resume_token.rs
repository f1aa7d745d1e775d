//! Resume token codec
//!
//! Transports hand back opaque resume tokens whose payload is a property-list
//! dictionary. Depending on the producing platform the dictionary is either a
//! plain plist or wrapped in a keyed archive, and some producers emit known
//! defects that must be repaired before the token can be fed back:
//!
//! - a `NSURLSessionResumeByteRange` entry that breaks resumption
//!   ([`TokenQuirks::StripByteRange`])
//! - archived request objects whose property keys are numbered off by one
//!   ([`TokenQuirks::RenumberRequestKeys`])
//!
//! Any decode or repair failure yields `None` ("no usable token"), and the
//! caller falls back to a fresh transfer.

use plist::{Dictionary, Value};
use std::io::Cursor;
use std::path::Path;

const KEY_INFO_VERSION: &str = "NSURLSessionResumeInfoVersion";
const KEY_TEMP_FILE_NAME: &str = "NSURLSessionResumeInfoTempFileName";
const KEY_LOCAL_PATH: &str = "NSURLSessionResumeInfoLocalPath";
const KEY_CURRENT_REQUEST: &str = "NSURLSessionResumeCurrentRequest";
const KEY_ORIGINAL_REQUEST: &str = "NSURLSessionResumeOriginalRequest";
const KEY_BYTE_RANGE: &str = "NSURLSessionResumeByteRange";

const ARCHIVE_OBJECTS: &str = "$objects";
const ARCHIVE_TOP: &str = "$top";
const ARCHIVE_ROOT: &str = "root";
const ARCHIVE_LEGACY_ROOT: &str = "NSKeyedArchiveRootObjectKey";
const REQUEST_PROP_PREFIX: &str = "__nsurlrequest_proto_prop_obj_";
const REQUEST_PROPS: &str = "__nsurlrequest_proto_props";

/// Keyed archives nest at most a handful of levels; anything deeper is treated as corrupt
const MAX_ARCHIVE_DEPTH: usize = 16;

/// Known resume-token defects of the producing transport
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenQuirks {
    /// Tokens are usable as produced
    #[default]
    None,
    /// Tokens carry a byte-range entry that must be removed
    StripByteRange,
    /// Archived requests inside the token have off-by-one property keys
    RenumberRequestKeys,
}

/// Repairs resume tokens and extracts their temporary-file identifier
#[derive(Clone, Copy, Debug, Default)]
pub struct ResumeTokenCodec {
    quirks: TokenQuirks,
}

impl ResumeTokenCodec {
    /// Create a codec for tokens with the given defects
    pub fn new(quirks: TokenQuirks) -> Self {
        Self { quirks }
    }

    /// Apply the repairs this codec's quirks call for
    ///
    /// Returns `None` when the token cannot be decoded or re-encoded.
    pub fn repair(&self, token: &[u8]) -> Option<Vec<u8>> {
        match self.quirks {
            TokenQuirks::None => Some(token.to_vec()),
            TokenQuirks::StripByteRange => {
                let mut dict = decode(token)?;
                dict.remove(KEY_BYTE_RANGE);
                encode_xml(dict)
            }
            TokenQuirks::RenumberRequestKeys => {
                let mut dict = decode(token)?;
                for key in [KEY_CURRENT_REQUEST, KEY_ORIGINAL_REQUEST] {
                    let repaired = match dict.get(key).and_then(Value::as_data) {
                        Some(data) => renumber_request(data)?,
                        None => continue,
                    };
                    dict.insert(key.to_string(), Value::Data(repaired));
                }
                encode_xml(dict)
            }
        }
    }

    /// Extract the name of the transport's temporary file from a token
    pub fn temp_file_name(token: &[u8]) -> Option<String> {
        let dict = decode(token)?;
        let version = dict.get(KEY_INFO_VERSION).and_then(integer_value)?;
        if version > 1 {
            dict.get(KEY_TEMP_FILE_NAME)
                .and_then(Value::as_string)
                .map(str::to_string)
        } else {
            let local_path = dict.get(KEY_LOCAL_PATH).and_then(Value::as_string)?;
            Path::new(local_path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        }
    }
}

/// Decode a token into its dictionary, trying the keyed-archive form first and
/// the plain plist form second
pub fn decode(token: &[u8]) -> Option<Dictionary> {
    let value = Value::from_reader(Cursor::new(token)).ok()?;
    let dict = value.into_dictionary()?;
    if let Some(unarchived) = unarchive(&dict) {
        return Some(unarchived);
    }
    if is_keyed_archive(&dict) {
        // An archive we could not resolve is not a usable plain dictionary either
        return None;
    }
    Some(dict)
}

fn is_keyed_archive(dict: &Dictionary) -> bool {
    dict.contains_key(ARCHIVE_OBJECTS) && dict.contains_key(ARCHIVE_TOP)
}

fn unarchive(archive: &Dictionary) -> Option<Dictionary> {
    if !is_keyed_archive(archive) {
        return None;
    }
    let objects = archive.get(ARCHIVE_OBJECTS)?.as_array()?;
    let top = archive.get(ARCHIVE_TOP)?.as_dictionary()?;
    let root = top
        .get(ARCHIVE_ROOT)
        .or_else(|| top.get(ARCHIVE_LEGACY_ROOT))?;
    resolve(objects, root, 0)?.into_dictionary()
}

fn resolve(objects: &[Value], value: &Value, depth: usize) -> Option<Value> {
    if depth > MAX_ARCHIVE_DEPTH {
        return None;
    }
    let Value::Uid(uid) = value else {
        return Some(value.clone());
    };
    let object = objects.get(usize::try_from(uid.get()).ok()?)?;
    match object {
        Value::Dictionary(dict) => {
            if let (Some(keys), Some(values)) = (
                dict.get("NS.keys").and_then(Value::as_array),
                dict.get("NS.objects").and_then(Value::as_array),
            ) {
                let mut out = Dictionary::new();
                for (key, val) in keys.iter().zip(values) {
                    let key = resolve(objects, key, depth + 1)?;
                    let key = key.as_string()?.to_string();
                    out.insert(key, resolve(objects, val, depth + 1)?);
                }
                return Some(Value::Dictionary(out));
            }
            if let Some(data) = dict.get("NS.data") {
                return Some(data.clone());
            }
            if let Some(string) = dict.get("NS.string") {
                return Some(string.clone());
            }
            Some(object.clone())
        }
        other => Some(other.clone()),
    }
}

fn renumber_request(data: &[u8]) -> Option<Vec<u8>> {
    let mut archive = Value::from_reader(Cursor::new(data))
        .ok()?
        .into_dictionary()?;

    let needs_fix = archive
        .get(ARCHIVE_OBJECTS)
        .and_then(Value::as_array)
        .and_then(|objects| objects.get(1))
        .and_then(Value::as_dictionary)
        .is_some_and(|obj| obj.contains_key(&format!("{REQUEST_PROP_PREFIX}0")));
    if !needs_fix {
        return Some(data.to_vec());
    }

    if let Some(Value::Array(objects)) = archive.get_mut(ARCHIVE_OBJECTS)
        && let Some(Value::Dictionary(request)) = objects.get_mut(1)
    {
        let mut k = 0;
        while request.contains_key(&format!("${k}")) {
            k += 1;
        }
        let mut i = 0;
        while let Some(value) = request.remove(&format!("{REQUEST_PROP_PREFIX}{i}")) {
            request.insert(format!("${}", i + k), value);
            i += 1;
        }
        if let Some(value) = request.remove(REQUEST_PROPS) {
            request.insert(format!("${}", i + k), value);
        }
    }

    if let Some(Value::Dictionary(top)) = archive.get_mut(ARCHIVE_TOP)
        && let Some(root) = top.remove(ARCHIVE_LEGACY_ROOT)
    {
        top.insert(ARCHIVE_ROOT.to_string(), root);
    }

    let mut out = Vec::new();
    Value::Dictionary(archive).to_writer_binary(&mut out).ok()?;
    Some(out)
}

fn encode_xml(dict: Dictionary) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    Value::Dictionary(dict).to_writer_xml(&mut out).ok()?;
    Some(out)
}

fn integer_value(value: &Value) -> Option<i64> {
    value
        .as_signed_integer()
        .or_else(|| value.as_unsigned_integer().and_then(|v| i64::try_from(v).ok()))
}

/// Build a minimal plain-plist token naming `temp_file_name`
#[cfg(test)]
pub(crate) fn sample_token(temp_file_name: &str) -> Vec<u8> {
    let mut dict = Dictionary::new();
    dict.insert(KEY_INFO_VERSION.to_string(), Value::Integer(2i64.into()));
    dict.insert(
        KEY_TEMP_FILE_NAME.to_string(),
        Value::String(temp_file_name.to_string()),
    );
    let mut out = Vec::new();
    #[allow(clippy::expect_used)]
    Value::Dictionary(dict)
        .to_writer_binary(&mut out)
        .expect("encode sample token");
    out
}
