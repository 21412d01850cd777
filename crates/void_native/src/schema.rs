//! Type and pipe documents
//!
//! Documents are TOML. A type document has optional top-level `binary`,
//! `size`, `server_check`, `constructor` and `destructor` keys, plus one
//! table per member section:
//!
//! ```toml
//! binary = "server"
//! size = 64
//!
//! [instance_attribute.health]
//! type = "int"
//! offset = 4
//! offset_windows = 8
//!
//! [virtual_function.get_health]
//! index = 2
//! return_type = "int"
//! ```
//!
//! Any key may carry a `_<platform>` suffix; it replaces the plain key on
//! that platform and is ignored elsewhere.

use crate::address::NativeAddress;
use crate::binary::Identifier;
use crate::class::{
    FieldDescriptor, FieldKind, FunctionDescriptor, FunctionTarget, Hook, MemberDef, TypeDefinition,
};
use crate::error::{BindError, Result};
use crate::function::{Convention, Signature};
use crate::pipe::{PipeDefinition, PipeFunction};
use crate::types::TypeDescriptor;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Platforms that may appear as key suffixes
pub const PLATFORMS: [&str; 3] = ["linux", "windows", "macos"];

/// Section holding virtual functions
pub const VIRTUAL_FUNCTION_SECTION: &str = "virtual_function";

/// Section holding member functions
pub const FUNCTION_SECTION: &str = "function";

/// An integer given as a number or a numeric string (`"0x1C"`, `"28"`)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Text(String),
}

impl Number {
    fn to_usize(&self) -> Option<usize> {
        match self {
            Number::Int(value) => usize::try_from(*value).ok(),
            Number::Text(text) => {
                let text = text.trim();
                match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => usize::from_str_radix(hex, 16).ok(),
                    None => text.parse().ok(),
                }
            }
        }
    }
}

/// Argument list given as an array or a comma separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Args {
    List(Vec<String>),
    Text(String),
}

impl Args {
    fn types(&self) -> Vec<TypeDescriptor> {
        let names: Vec<&str> = match self {
            Args::List(names) => names.iter().map(String::as_str).collect(),
            Args::Text(text) => text.split(',').collect(),
        };
        names
            .into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(TypeDescriptor::parse)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Address(i64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    binary: Option<String>,
    size: Option<Number>,
    server_check: Option<bool>,
    constructor: Option<String>,
    destructor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    #[serde(rename = "type")]
    type_name: String,
    offset: Number,
    length: Option<Number>,
    doc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    args: Option<Args>,
    return_type: Option<String>,
    convention: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VirtualEntry {
    index: Number,
    #[serde(flatten)]
    signature: SignatureEntry,
    doc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FunctionEntry {
    identifier: RawIdentifier,
    #[serde(flatten)]
    signature: SignatureEntry,
    doc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PipeEntry {
    binary: String,
    identifier: RawIdentifier,
    #[serde(flatten)]
    signature: SignatureEntry,
    server_check: Option<bool>,
    doc: Option<String>,
}

/// Location of an entry, for error context
struct Entry<'a> {
    section: &'a str,
    name: &'a str,
}

impl Entry<'_> {
    fn error(&self, message: impl Into<String>) -> BindError {
        BindError::schema(self.section, self.name, message)
    }

    fn parse<T: DeserializeOwned>(&self, table: toml::Table, platform: &str) -> Result<T> {
        toml::Value::Table(apply_platform(table, platform))
            .try_into()
            .map_err(|e: toml::de::Error| self.error(e.message()))
    }

    fn count(&self, key: &str, number: &Number) -> Result<usize> {
        number
            .to_usize()
            .ok_or_else(|| self.error(format!("'{}' is not a non-negative integer: {:?}", key, number)))
    }

    fn signature(&self, entry: &SignatureEntry, default: Convention) -> Result<Signature> {
        let args = entry.args.as_ref().map(Args::types).unwrap_or_default();
        let return_type = entry
            .return_type
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.eq_ignore_ascii_case("void"))
            .map(TypeDescriptor::parse);
        let convention = match &entry.convention {
            Some(name) => Convention::from_name(name)
                .ok_or_else(|| self.error(format!("unknown calling convention '{}'", name)))?,
            None => default,
        };
        Ok(Signature::new(args, return_type, convention))
    }

    fn identifier(&self, raw: &RawIdentifier) -> Result<Identifier> {
        match raw {
            RawIdentifier::Address(value) => usize::try_from(*value)
                .map(|address| Identifier::Address(NativeAddress::new(address)))
                .map_err(|_| self.error(format!("invalid address {}", value))),
            RawIdentifier::Text(text) => Identifier::parse(text)
                .ok_or_else(|| self.error(format!("invalid identifier '{}'", text))),
        }
    }
}

/// Resolve `<key>_<platform>` overrides, dropping other platforms' keys
fn apply_platform(table: toml::Table, platform: &str) -> toml::Table {
    let mut plain = toml::Table::new();
    let mut overrides = Vec::new();

    for (key, value) in table {
        let suffixed = PLATFORMS.iter().find_map(|p| {
            key.strip_suffix(p)
                .and_then(|rest| rest.strip_suffix('_'))
                .filter(|base| !base.is_empty())
                .map(|base| (base.to_string(), *p))
        });
        match suffixed {
            Some((base, p)) if p == platform => overrides.push((base, value)),
            Some(_) => {}
            None => {
                plain.insert(key, value);
            }
        }
    }

    plain.extend(overrides);
    plain
}

fn sections(document: &toml::Table, section: &str) -> Result<Vec<(String, toml::Table)>> {
    let Some(value) = document.get(section) else {
        return Ok(Vec::new());
    };
    let toml::Value::Table(entries) = value else {
        return Err(BindError::schema(section, "*", "expected a table of entries"));
    };

    entries
        .iter()
        .map(|(name, entry)| match entry {
            toml::Value::Table(table) => Ok((name.clone(), table.clone())),
            _ => Err(BindError::schema(section, name.as_str(), "expected a table")),
        })
        .collect()
}

/// Compile a type document into a definition
///
/// Fails on the first malformed entry; nothing is registered here.
pub fn parse_type_document(text: &str, platform: &str) -> Result<TypeDefinition> {
    let document: toml::Table = text.parse()?;
    let header_entry = Entry {
        section: "type",
        name: "header",
    };
    let header: Header = header_entry.parse(document.clone(), platform)?;

    let mut definition = TypeDefinition::new();
    definition.binary = header.binary;
    definition.server_check = header.server_check;
    definition.size = header
        .size
        .as_ref()
        .map(|size| header_entry.count("size", size))
        .transpose()?;
    definition.constructor = header.constructor.map(Hook::Member);
    definition.destructor = header.destructor.map(Hook::Member);

    for kind in FieldKind::ALL {
        for (name, table) in sections(&document, kind.section())? {
            let entry = Entry {
                section: kind.section(),
                name: &name,
            };
            let raw: FieldEntry = entry.parse(table, platform)?;
            let length = raw
                .length
                .as_ref()
                .map(|length| entry.count("length", length))
                .transpose()?;
            let field = FieldDescriptor::new(
                TypeDescriptor::parse(&raw.type_name),
                entry.count("offset", &raw.offset)?,
                kind,
            )
            .with_length(length)
            .with_doc(raw.doc);
            definition = definition.field(name, field);
        }
    }

    for (name, table) in sections(&document, VIRTUAL_FUNCTION_SECTION)? {
        let entry = Entry {
            section: VIRTUAL_FUNCTION_SECTION,
            name: &name,
        };
        let raw: VirtualEntry = entry.parse(table, platform)?;
        let index = entry.count("index", &raw.index)?;
        let signature = entry.signature(&raw.signature, Convention::Thiscall)?;
        definition = definition.member(
            name,
            function(FunctionTarget::VirtualIndex(index), signature, raw.doc),
        );
    }

    for (name, table) in sections(&document, FUNCTION_SECTION)? {
        let entry = Entry {
            section: FUNCTION_SECTION,
            name: &name,
        };
        let raw: FunctionEntry = entry.parse(table, platform)?;
        let identifier = entry.identifier(&raw.identifier)?;
        let signature = entry.signature(&raw.signature, Convention::Thiscall)?;
        definition = definition.member(
            name,
            function(FunctionTarget::Identifier(identifier), signature, raw.doc),
        );
    }

    Ok(definition)
}

fn function(target: FunctionTarget, signature: Signature, doc: Option<String>) -> MemberDef {
    MemberDef::Function(FunctionDescriptor {
        target,
        signature: signature.with_receiver(),
        doc,
    })
}

/// Compile a pipe document into a definition
pub fn parse_pipe_document(text: &str, platform: &str) -> Result<PipeDefinition> {
    let document: toml::Table = text.parse()?;
    let mut definition = PipeDefinition::new();

    for (name, value) in document {
        let entry = Entry {
            section: "pipe",
            name: &name,
        };
        let toml::Value::Table(table) = value else {
            return Err(entry.error("expected a table"));
        };
        let raw: PipeEntry = entry.parse(table, platform)?;
        let function = PipeFunction {
            binary: raw.binary,
            identifier: entry.identifier(&raw.identifier)?,
            signature: entry.signature(&raw.signature, Convention::Cdecl)?,
            server_check: raw.server_check.unwrap_or(true),
            doc: raw.doc,
        };
        definition = definition.function(name.as_str(), function);
    }

    Ok(definition)
}
