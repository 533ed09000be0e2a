//! Parameter trees: nested named lists and objects of typed parameters.
//!
//! A [`ParameterIo`] document has a root [`ParameterList`]. Lists hold child
//! lists and [`ParameterObject`]s; objects hold named [`Parameter`] scalars.
//! The binary form is a four byte magic followed by a MessagePack payload.

use crate::compression::decompress_if_needed;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    Bool(bool),
    Int(i32),
    U32(u32),
    F32(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Color([f32; 4]),
    String(String),
    BufferInt(Vec<i32>),
    BufferF32(Vec<f32>),
}

impl Parameter {
    /// Short name of the parameter's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Parameter::Bool(_) => "bool",
            Parameter::Int(_) => "int",
            Parameter::U32(_) => "u32",
            Parameter::F32(_) => "f32",
            Parameter::Vec2(_) => "vec2",
            Parameter::Vec3(_) => "vec3",
            Parameter::Vec4(_) => "vec4",
            Parameter::Color(_) => "color",
            Parameter::String(_) => "string",
            Parameter::BufferInt(_) => "buffer_int",
            Parameter::BufferF32(_) => "buffer_f32",
        }
    }

    /// Returns `true` if both parameters hold the same type.
    pub fn same_type(&self, other: &Parameter) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// A named group of parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterObject {
    pub params: BTreeMap<String, Parameter>,
}

impl ParameterObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, param: Parameter) -> Self {
        self.params.insert(name.into(), param);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A named group of child lists and objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterList {
    pub lists: BTreeMap<String, ParameterList>,
    pub objects: BTreeMap<String, ParameterObject>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style list insert.
    pub fn with_list(mut self, name: impl Into<String>, list: ParameterList) -> Self {
        self.lists.insert(name.into(), list);
        self
    }

    /// Builder-style object insert.
    pub fn with_object(mut self, name: impl Into<String>, object: ParameterObject) -> Self {
        self.objects.insert(name.into(), object);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.objects.is_empty()
    }
}

/// A parameter tree document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterIo {
    pub version: u32,
    pub doc_type: String,
    pub root: ParameterList,
}

impl ParameterIo {
    pub const MAGIC: [u8; 4] = *b"AAMP";

    pub fn new(doc_type: impl Into<String>, root: ParameterList) -> Self {
        Self {
            version: 2,
            doc_type: doc_type.into(),
            root,
        }
    }

    /// Returns `true` if the buffer (after decompression) starts with the parameter magic.
    pub fn is_parameter_io(data: &[u8]) -> bool {
        match decompress_if_needed(data) {
            Ok(raw) => raw.starts_with(&Self::MAGIC),
            Err(_) => false,
        }
    }

    /// Decode a parameter document, decompressing it first if needed.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let raw = decompress_if_needed(data)?;
        let Some(payload) = raw.strip_prefix(&Self::MAGIC) else {
            return Err(Error::InvalidMagic {
                expected: Self::MAGIC,
                found: raw.iter().take(4).copied().collect(),
            });
        };
        Ok(rmp_serde::from_slice(payload)?)
    }

    /// Encode the document without compression.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = Self::MAGIC.to_vec();
        out.extend(rmp_serde::to_vec(self)?);
        Ok(out)
    }
}
