//! Rebuilds the GraphQL request context (operation, selections, directives,
//! type references and response path) from its wire form.
//!
//! Every builder decodes argument maps through the per-call [`Variables`]
//! table so `variable` references resolve transparently. Sub-lists and maps
//! are only attached when non-empty.

use std::collections::{BTreeMap, HashMap};

use crate::error::DriverError;
use crate::proto;
use crate::value::{Value, Variables, unmarshal, unmarshal_map};

type Arguments = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Named(String),
    NonNull(Box<TypeRef>),
    List(Box<TypeRef>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Option<Arguments>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelection {
    pub name: String,
    pub arguments: Option<Arguments>,
    pub directives: Option<Vec<Directive>>,
    pub selection_set: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    pub type_condition: Option<TypeRef>,
    pub directives: Option<Vec<Directive>>,
    pub variable_definitions: Option<Vec<VariableDefinition>>,
    pub selection_set: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(FieldSelection),
    Fragment(FragmentDefinition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub operation: String,
    pub name: Option<String>,
    pub directives: Option<Vec<Directive>>,
    pub variable_definitions: Option<Vec<VariableDefinition>>,
    pub selection_set: Option<Vec<Selection>>,
}

/// Linked list from the resolved field back to the root field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePath {
    pub key: Value,
    pub prev: Option<Box<ResponsePath>>,
}

/// Resolver context handed to field, interface and union handlers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolveInfo {
    pub field_name: String,
    pub path: Option<ResponsePath>,
    pub return_type: Option<TypeRef>,
    pub parent_type: Option<TypeRef>,
    pub operation: Option<OperationDefinition>,
    pub variable_values: Option<Arguments>,
}

// -----------------------------------------------------------------------------
// builders
// -----------------------------------------------------------------------------

/// First non-empty of `name`, `non_null`, `list` wins; none set means no type.
pub fn build_type_ref(t: &proto::TypeRef) -> Option<TypeRef> {
    if !t.name.is_empty() {
        return Some(TypeRef::Named(t.name.clone()));
    }
    if let Some(inner) = t.non_null.as_deref().and_then(build_type_ref) {
        return Some(TypeRef::NonNull(Box::new(inner)));
    }
    t.list
        .as_deref()
        .and_then(build_type_ref)
        .map(|inner| TypeRef::List(Box::new(inner)))
}

pub fn build_directives(directives: &[proto::Directive], vars: &Variables) -> Vec<Directive> {
    directives
        .iter()
        .map(|d| Directive {
            name: d.name.clone(),
            arguments: non_empty_map(unmarshal_map(&d.arguments, Some(vars))),
        })
        .collect()
}

pub fn build_variable_definitions(defs: &[proto::VariableDefinition]) -> Vec<VariableDefinition> {
    defs.iter()
        .map(|d| VariableDefinition {
            name: d.variable.as_ref().map(|v| v.name.clone()).unwrap_or_default(),
            default_value: d.default_value.as_ref().and_then(|v| unmarshal(v, None)),
        })
        .collect()
}

pub fn build_selections(
    selections: &[proto::Selection],
    vars: &Variables,
) -> Result<Vec<Selection>, DriverError> {
    selections.iter().map(|s| build_selection(s, vars)).collect()
}

fn build_selection(s: &proto::Selection, vars: &Variables) -> Result<Selection, DriverError> {
    if !s.name.is_empty() {
        return Ok(Selection::Field(FieldSelection {
            name: s.name.clone(),
            arguments: non_empty_map(unmarshal_map(&s.arguments, Some(vars))),
            directives: non_empty(build_directives(&s.directives, vars)),
            selection_set: non_empty(build_selections(&s.selection_set, vars)?),
        }));
    }
    let def = s.definition.as_ref().ok_or(DriverError::InvalidSelection)?;
    Ok(Selection::Fragment(FragmentDefinition {
        type_condition: def.type_condition.as_ref().and_then(build_type_ref),
        directives: non_empty(build_directives(&def.directives, vars)),
        variable_definitions: non_empty(build_variable_definitions(&def.variable_definitions)),
        selection_set: non_empty(build_selections(&def.selection_set, vars)?),
    }))
}

pub fn build_operation(
    op: &proto::OperationDefinition,
    vars: &Variables,
) -> Result<OperationDefinition, DriverError> {
    Ok(OperationDefinition {
        operation: op.operation.clone(),
        name: (!op.name.is_empty()).then(|| op.name.clone()),
        directives: non_empty(build_directives(&op.directives, vars)),
        variable_definitions: non_empty(build_variable_definitions(&op.variable_definitions)),
        selection_set: non_empty(build_selections(&op.selection_set, vars)?),
    })
}

/// Walks the wire `prev` chain; whatever depth the message carries is kept.
pub fn build_path(path: &proto::ResponsePath) -> ResponsePath {
    let mut keys = Vec::new();
    let mut cursor = Some(path);
    while let Some(node) = cursor {
        keys.push(node.key.as_ref().and_then(|k| unmarshal(k, None)).unwrap_or_default());
        cursor = node.prev.as_deref();
    }
    let mut built: Option<ResponsePath> = None;
    for key in keys.into_iter().rev() {
        built = Some(ResponsePath { key, prev: built.map(Box::new) });
    }
    // the loop ran at least once
    built.unwrap_or(ResponsePath { key: Value::Null, prev: None })
}

/// Operation defaults first, then explicit values on top.
pub fn variable_table(
    operation: Option<&proto::OperationDefinition>,
    explicit: &HashMap<String, proto::Value>,
) -> Variables {
    let mut vars = Variables::new();
    if let Some(op) = operation {
        for def in &op.variable_definitions {
            if let (Some(var), Some(default)) = (&def.variable, &def.default_value) {
                vars.insert(var.name.clone(), default.clone());
            }
        }
    }
    for (name, value) in explicit {
        vars.insert(name.clone(), value.clone());
    }
    vars
}

/// Common shape of the three resolve-info wire messages.
pub trait InfoMessage {
    fn field_name(&self) -> &str;
    fn path(&self) -> Option<&proto::ResponsePath>;
    fn return_type(&self) -> Option<&proto::TypeRef>;
    fn parent_type(&self) -> Option<&proto::TypeRef>;
    fn operation(&self) -> Option<&proto::OperationDefinition>;
    fn variable_values(&self) -> &HashMap<String, proto::Value>;
}

macro_rules! info_message {
    ($($ty:ty),*) => {$(
        impl InfoMessage for $ty {
            fn field_name(&self) -> &str { &self.field_name }
            fn path(&self) -> Option<&proto::ResponsePath> { self.path.as_ref() }
            fn return_type(&self) -> Option<&proto::TypeRef> { self.return_type.as_ref() }
            fn parent_type(&self) -> Option<&proto::TypeRef> { self.parent_type.as_ref() }
            fn operation(&self) -> Option<&proto::OperationDefinition> { self.operation.as_ref() }
            fn variable_values(&self) -> &HashMap<String, proto::Value> { &self.variable_values }
        }
    )*};
}

info_message!(
    proto::FieldResolveInfo,
    proto::InterfaceResolveTypeInfo,
    proto::UnionResolveTypeInfo
);

impl ResolveInfo {
    /// Builds the resolver context together with the variable table every
    /// other argument of the call should be decoded through.
    pub fn build<I: InfoMessage>(info: &I) -> Result<(ResolveInfo, Variables), DriverError> {
        let vars = variable_table(info.operation(), info.variable_values());
        let operation = info.operation().map(|op| build_operation(op, &vars)).transpose()?;
        let resolve_info = ResolveInfo {
            field_name: info.field_name().to_string(),
            path: info.path().map(build_path),
            return_type: info.return_type().and_then(build_type_ref),
            parent_type: info.parent_type().and_then(build_type_ref),
            operation,
            variable_values: non_empty_map(unmarshal_map(info.variable_values(), None)),
        };
        Ok((resolve_info, vars))
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map(map: Arguments) -> Option<Arguments> {
    (!map.is_empty()).then_some(map)
}

// -----------------------------------------------------------------------------
// native value views handed to handlers
// -----------------------------------------------------------------------------

fn list<T>(items: &Option<Vec<T>>, f: impl Fn(&T) -> Value) -> Option<Value> {
    items.as_ref().map(|items| Value::Array(items.iter().map(f).collect()))
}

fn map(args: &Option<Arguments>) -> Option<Value> {
    args.clone().map(Value::Object)
}

impl From<&TypeRef> for Value {
    fn from(t: &TypeRef) -> Self {
        match t {
            TypeRef::Named(name) => Value::object([("name", Some(Value::from(name.as_str())))]),
            TypeRef::NonNull(inner) => Value::object([("nonNull", Some(Value::from(&**inner)))]),
            TypeRef::List(inner) => Value::object([("list", Some(Value::from(&**inner)))]),
        }
    }
}

impl From<&Directive> for Value {
    fn from(d: &Directive) -> Self {
        Value::object([
            ("name", Some(Value::from(d.name.as_str()))),
            ("arguments", map(&d.arguments)),
        ])
    }
}

impl From<&VariableDefinition> for Value {
    fn from(d: &VariableDefinition) -> Self {
        Value::object([
            ("variable", Some(Value::object([("name", Some(Value::from(d.name.as_str())))]))),
            ("defaultValue", d.default_value.clone()),
        ])
    }
}

impl From<&Selection> for Value {
    fn from(s: &Selection) -> Self {
        match s {
            Selection::Field(f) => Value::object([
                ("name", Some(Value::from(f.name.as_str()))),
                ("arguments", map(&f.arguments)),
                ("directives", list(&f.directives, |x| Value::from(x))),
                ("selectionSet", list(&f.selection_set, |x| Value::from(x))),
            ]),
            Selection::Fragment(def) => Value::object([(
                "definition",
                Some(Value::object([
                    ("typeCondition", def.type_condition.as_ref().map(Value::from)),
                    ("directives", list(&def.directives, |x| Value::from(x))),
                    ("variableDefinitions", list(&def.variable_definitions, |x| Value::from(x))),
                    ("selectionSet", list(&def.selection_set, |x| Value::from(x))),
                ])),
            )]),
        }
    }
}

impl From<&OperationDefinition> for Value {
    fn from(op: &OperationDefinition) -> Self {
        Value::object([
            ("operation", Some(Value::from(op.operation.as_str()))),
            ("name", op.name.clone().map(Value::from)),
            ("directives", list(&op.directives, |x| Value::from(x))),
            ("variableDefinitions", list(&op.variable_definitions, |x| Value::from(x))),
            ("selectionSet", list(&op.selection_set, |x| Value::from(x))),
        ])
    }
}

impl From<&ResponsePath> for Value {
    fn from(p: &ResponsePath) -> Self {
        // iterative so deep paths never recurse
        let mut nodes = Vec::new();
        let mut cursor = Some(p);
        while let Some(node) = cursor {
            nodes.push(&node.key);
            cursor = node.prev.as_deref();
        }
        let mut built: Option<Value> = None;
        for key in nodes.into_iter().rev() {
            built = Some(Value::object([("key", Some(key.clone())), ("prev", built)]));
        }
        built.unwrap_or_default()
    }
}

impl From<&ResolveInfo> for Value {
    fn from(info: &ResolveInfo) -> Self {
        Value::object([
            ("fieldName", Some(Value::from(info.field_name.as_str()))),
            ("path", info.path.as_ref().map(Value::from)),
            ("returnType", info.return_type.as_ref().map(Value::from)),
            ("parentType", info.parent_type.as_ref().map(Value::from)),
            ("operation", info.operation.as_ref().map(Value::from)),
            ("variableValues", map(&info.variable_values)),
        ])
    }
}
