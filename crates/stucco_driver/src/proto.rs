//! Generated wire types for the driver and go-plugin controller services.

#![allow(clippy::large_enum_variant, clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("proto");

pub mod plugin {
    tonic::include_proto!("plugin");
}

impl Error {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Function {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Value {
    pub fn nil() -> Self {
        Self { kind: Some(value::Kind::Nil(true)) }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self { kind: Some(value::Kind::S(s.into())) }
    }

    pub fn int(i: i64) -> Self {
        Self { kind: Some(value::Kind::I(i)) }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self { kind: Some(value::Kind::Variable(name.into())) }
    }

    pub fn object<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            kind: Some(value::Kind::O(ObjectValue {
                props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            })),
        }
    }
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}
