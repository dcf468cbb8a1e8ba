use bytes::BufMut;
use std::sync::Mutex;

pub type ParamId = i32;

/// ParamType is the wire type tag of a SystemParameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ParamType {
    Integer = 0,
    Float = 1,
    Bool = 2,
    String = 3,
    BigInt = 4,
}

/// Current value of a system parameter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamValue {
    Integer(i32),
    Float(f32),
    Bool(bool),
    String(Option<String>),
    BigInt(u64),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Integer(_) => ParamType::Integer,
            Self::Float(_) => ParamType::Float,
            Self::Bool(_) => ParamType::Bool,
            Self::String(_) => ParamType::String,
            Self::BigInt(_) => ParamType::BigInt,
        }
    }

    /// Render the value as the runtime expects to parse it.
    pub fn render(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => format!("{v:.6}"),
            Self::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            Self::String(v) => v.clone().unwrap_or_default(),
            Self::BigInt(v) => v.to_string(),
        }
    }
}

/// ParameterDef describes a system parameter and its current value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDef {
    pub id: ParamId,
    pub name: String,
    /// May users change this parameter?
    pub user_change: bool,
    /// Is this parameter scoped to a session?
    pub for_session: bool,
    pub value: ParamValue,
}

/// ParameterSource lists system parameters with their current values.
pub trait ParameterSource: Send + Sync {
    fn parameters(&self) -> Vec<ParameterDef>;
}

/// MemoryParameters is a ParameterSource of parameters held in memory.
#[derive(Default)]
pub struct MemoryParameters {
    defs: Mutex<Vec<ParameterDef>>,
}

impl MemoryParameters {
    pub fn new(defs: Vec<ParameterDef>) -> Self {
        Self {
            defs: Mutex::new(defs),
        }
    }

    /// Update the value of parameter `id`, returning false if it's not defined.
    pub fn set(&self, id: ParamId, value: ParamValue) -> bool {
        let mut defs = self.defs.lock().unwrap();
        match defs.iter_mut().find(|def| def.id == id) {
            Some(def) => {
                def.value = value;
                true
            }
            None => false,
        }
    }
}

impl ParameterSource for MemoryParameters {
    fn parameters(&self) -> Vec<ParameterDef> {
        self.defs.lock().unwrap().clone()
    }
}

/// SystemParameter is a changed session parameter as sent to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemParameter {
    pub id: ParamId,
    pub ty: ParamType,
    pub value: String,
}

impl SystemParameter {
    pub fn from_def(def: &ParameterDef) -> Self {
        Self {
            id: def.id,
            ty: def.value.param_type(),
            value: def.value.render(),
        }
    }

    /// Pack as id, type, and a length-prefixed UTF-8 value.
    pub fn pack<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.id);
        buf.put_i32(self.ty as i32);
        buf.put_i32(self.value.len() as i32);
        buf.put_slice(self.value.as_bytes());
    }
}
