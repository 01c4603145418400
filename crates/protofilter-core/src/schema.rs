//! Schema graph model
//!
//! A [`SchemaSet`] is an arena of linked schema elements (files, messages,
//! enums, enum values, services, methods and fields). Ownership follows
//! declaration: a file owns its top-level types, a message owns its nested
//! types and fields, and so on. Field and method type references are plain
//! [`ElementId`] links and may point anywhere in the set, including other files.

use std::collections::HashMap;

use crate::defs::{self, FileDef};
use crate::path;

/// Index of an element inside a [`SchemaSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    /// Raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

/// Protobuf syntax revision of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Syntax {
    /// `syntax = "proto2";` (also the implicit default)
    #[default]
    Proto2,

    /// `syntax = "proto3";`
    Proto3,
}

impl Syntax {
    /// Keyword used in the `syntax` statement
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proto2 => "proto2",
            Self::Proto3 => "proto3",
        }
    }

    /// Parse the `syntax` field of a file descriptor (empty means proto2)
    pub fn from_descriptor(value: &str) -> Self {
        match value {
            "proto3" => Self::Proto3,
            _ => Self::Proto2,
        }
    }
}

/// Scalar field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl ScalarType {
    /// Keyword as written in a `.proto` file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Int32 => "int32",
            Self::Fixed64 => "fixed64",
            Self::Fixed32 => "fixed32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Uint32 => "uint32",
            Self::Sfixed32 => "sfixed32",
            Self::Sfixed64 => "sfixed64",
            Self::Sint32 => "sint32",
            Self::Sint64 => "sint64",
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Label {
    #[default]
    Optional,
    Required,
    Repeated,
}

/// Comments attached to a declaration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Comments {
    /// Detached comment blocks preceding the leading comment
    pub leading_detached: Vec<String>,

    /// Comment directly above the declaration
    pub leading: Option<String>,

    /// Comment directly after the declaration
    pub trailing: Option<String>,
}

impl Comments {
    /// Create comments with only a leading comment
    pub fn leading(text: impl Into<String>) -> Self {
        Self {
            leading: Some(text.into()),
            ..Self::default()
        }
    }

    /// Whether no comment is attached at all
    pub fn is_empty(&self) -> bool {
        self.leading_detached.is_empty() && self.leading.is_none() && self.trailing.is_none()
    }
}

/// Value of a file-level option, copied verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Quoted string literal
    String(String),

    /// `true` / `false`
    Bool(bool),

    /// Enum constant, printed unquoted (e.g. `SPEED`)
    Ident(String),
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Ident(i) => write!(f, "{}", i),
        }
    }
}

/// A file-level option such as `java_package`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOption {
    pub name: String,
    pub value: OptionValue,
}

impl FileOption {
    pub fn new(name: impl Into<String>, value: OptionValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Target type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    Message(ElementId),
    Enum(ElementId),
}

impl FieldType {
    /// Referenced message or enum, if this is not a scalar
    pub fn target(&self) -> Option<ElementId> {
        match self {
            Self::Scalar(_) => None,
            Self::Message(id) | Self::Enum(id) => Some(*id),
        }
    }
}

/// Kind of a schema element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    File,
    Message,
    Enum,
    EnumValue,
    Service,
    Method,
    Field,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Message => "message",
            Self::Enum => "enum",
            Self::EnumValue => "enum value",
            Self::Service => "service",
            Self::Method => "method",
            Self::Field => "field",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileBody {
    pub syntax: Syntax,
    pub package: String,
    pub dependencies: Vec<String>,
    pub options: Vec<FileOption>,
    pub comments: Comments,
    pub syntax_comments: Comments,
    pub package_comments: Comments,
    pub messages: Vec<ElementId>,
    pub enums: Vec<ElementId>,
    pub services: Vec<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageBody {
    /// Synthetic wrapper generated for a `map<K, V>` field
    pub map_entry: bool,
    pub messages: Vec<ElementId>,
    pub enums: Vec<ElementId>,
    pub fields: Vec<ElementId>,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumBody {
    pub values: Vec<ElementId>,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumValueBody {
    pub number: i32,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceBody {
    pub methods: Vec<ElementId>,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    pub input: ElementId,
    pub output: ElementId,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBody {
    pub number: i32,
    pub label: Label,
    pub field_type: FieldType,
    pub comments: Comments,
}

/// Kind-specific payload of an element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementBody {
    File(FileBody),
    Message(MessageBody),
    Enum(EnumBody),
    EnumValue(EnumValueBody),
    Service(ServiceBody),
    Method(MethodBody),
    Field(FieldBody),
}

/// A named element with a declaring parent
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,

    /// Declaring element; `None` only for files
    pub parent: Option<ElementId>,

    pub body: ElementBody,
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match &self.body {
            ElementBody::File(_) => ElementKind::File,
            ElementBody::Message(_) => ElementKind::Message,
            ElementBody::Enum(_) => ElementKind::Enum,
            ElementBody::EnumValue(_) => ElementKind::EnumValue,
            ElementBody::Service(_) => ElementKind::Service,
            ElementBody::Method(_) => ElementKind::Method,
            ElementBody::Field(_) => ElementKind::Field,
        }
    }

    pub fn as_file(&self) -> Option<&FileBody> {
        match &self.body {
            ElementBody::File(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageBody> {
        match &self.body {
            ElementBody::Message(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumBody> {
        match &self.body {
            ElementBody::Enum(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_enum_value(&self) -> Option<&EnumValueBody> {
        match &self.body {
            ElementBody::EnumValue(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceBody> {
        match &self.body {
            ElementBody::Service(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodBody> {
        match &self.body {
            ElementBody::Method(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldBody> {
        match &self.body {
            ElementBody::Field(body) => Some(body),
            _ => None,
        }
    }

    /// Whether this is a synthetic map-entry message
    pub fn is_map_entry(&self) -> bool {
        self.as_message().map(|m| m.map_entry).unwrap_or(false)
    }
}

/// A linked schema graph made of one or more files
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    pub(crate) elements: Vec<Element>,
    pub(crate) files: Vec<ElementId>,
    pub(crate) by_path: HashMap<String, ElementId>,
    pub(crate) by_full_name: HashMap<String, ElementId>,
}

impl SchemaSet {
    /// Link unlinked file declarations into a schema graph
    ///
    /// Type names in fields and methods are resolved with protobuf scoping
    /// rules; a leading `.` makes a name fully qualified.
    pub fn from_defs(files: Vec<FileDef>) -> Result<Self, SchemaError> {
        defs::link(files)
    }

    /// Top-level files, in declaration order
    pub fn files(&self) -> &[ElementId] {
        &self.files
    }

    /// Number of elements in the set
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element by id
    ///
    /// Ids are only meaningful for the set that produced them.
    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    /// Name of an element
    pub fn name(&self, id: ElementId) -> &str {
        &self.element(id).name
    }

    /// Find an element by its path
    pub fn find(&self, path: &str) -> Option<ElementId> {
        self.by_path.get(path).copied()
    }

    /// Find a message or enum by fully-qualified name (`.pkg.Outer.Inner`)
    pub fn find_type(&self, full_name: &str) -> Option<ElementId> {
        self.by_full_name.get(full_name).copied()
    }

    /// Find a file by name
    pub fn file_by_name(&self, name: &str) -> Option<ElementId> {
        self.files
            .iter()
            .copied()
            .find(|id| self.element(*id).name == name)
    }

    /// Declaring ancestors of an element, outermost (the file) first
    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        let mut current = self.element(id).parent;
        while let Some(parent) = current {
            result.push(parent);
            current = self.element(parent).parent;
        }
        result.reverse();
        result
    }

    /// File declaring an element (the element itself for files)
    pub fn file_of(&self, id: ElementId) -> ElementId {
        self.ancestors(id).first().copied().unwrap_or(id)
    }

    /// Names from the declaring file down to the element
    pub fn path_segments(&self, id: ElementId) -> Vec<&str> {
        let mut segments: Vec<&str> = self
            .ancestors(id)
            .into_iter()
            .map(|a| self.name(a))
            .collect();
        segments.push(self.name(id));
        segments
    }

    /// Path of an element (e.g. `test.proto/msg_a/field_a_1`)
    pub fn path_of(&self, id: ElementId) -> String {
        path::build_path(&self.path_segments(id))
    }

    /// Fully-qualified protobuf name of an element
    ///
    /// For a file this is its package scope (`.pkg`, or empty).
    pub fn full_name(&self, id: ElementId) -> String {
        let file = self.file_of(id);
        let mut name = package_scope(
            self.element(file)
                .as_file()
                .map(|f| f.package.as_str())
                .unwrap_or_default(),
        );
        if id == file {
            return name;
        }
        for ancestor in self.ancestors(id).into_iter().skip(1) {
            name.push('.');
            name.push_str(self.name(ancestor));
        }
        name.push('.');
        name.push_str(self.name(id));
        name
    }

    /// Key and value types of a map field, if the field is map-typed
    pub fn map_entry_types(&self, field: ElementId) -> Option<(FieldType, FieldType)> {
        let entry = match self.element(field).as_field()?.field_type {
            FieldType::Message(entry) => entry,
            _ => return None,
        };
        let body = self.element(entry).as_message()?;
        if !body.map_entry {
            return None;
        }
        let mut key = None;
        let mut value = None;
        for &entry_field in &body.fields {
            let f = self.element(entry_field).as_field()?;
            match f.number {
                1 => key = Some(f.field_type),
                2 => value = Some(f.field_type),
                _ => {}
            }
        }
        Some((key?, value?))
    }

    /// All element ids in allocation order
    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        (0..self.elements.len()).map(ElementId)
    }
}

/// Scope prefix for a package (`.pkg`, or empty for no package)
pub fn package_scope(package: &str) -> String {
    if package.is_empty() {
        String::new()
    } else {
        format!(".{}", package)
    }
}

/// Schema linking errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unresolved type '{type_name}' referenced from {path}")]
    UnresolvedType { path: String, type_name: String },

    #[error("Invalid reference to '{type_name}' from {path}: {reason}")]
    InvalidReference {
        path: String,
        type_name: String,
        reason: String,
    },

    #[error("Duplicate element path: {0}")]
    DuplicatePath(String),

    #[error("Duplicate type name: {0}")]
    DuplicateType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{EnumDef, FieldDef, MessageDef, MethodDef, ServiceDef};

    fn sample() -> SchemaSet {
        SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_syntax(Syntax::Proto3)
            .with_package("demo")
            .with_message(
                MessageDef::new("msg_a")
                    .with_field(FieldDef::named("field_a_1", 1, "msg_b"))
                    .with_field(FieldDef::named("field_a_2", 2, "msg_a.Inner"))
                    .with_message(
                        MessageDef::new("Inner").with_field(FieldDef::named("kind", 1, "Kind")),
                    ),
            )
            .with_message(MessageDef::new("msg_b").with_field(FieldDef::scalar(
                "field_b_1",
                1,
                ScalarType::String,
            )))
            .with_enum(EnumDef::new("Kind").with_value("KIND_UNSET", 0))
            .with_service(ServiceDef::new("svc_a").with_method(MethodDef::new(
                "method_a_1",
                "msg_a",
                ".demo.msg_b",
            )))])
        .unwrap()
    }

    #[test]
    fn paths_and_full_names() {
        let set = sample();
        let inner = set.find("test.proto/msg_a/Inner").unwrap();

        assert_eq!(set.path_of(inner), "test.proto/msg_a/Inner");
        assert_eq!(set.full_name(inner), ".demo.msg_a.Inner");
        assert_eq!(set.find_type(".demo.msg_a.Inner"), Some(inner));
        assert_eq!(set.element(inner).kind(), ElementKind::Message);
    }

    #[test]
    fn references_are_linked_across_scopes() {
        let set = sample();
        let field = set.find("test.proto/msg_a/field_a_1").unwrap();
        let msg_b = set.find("test.proto/msg_b").unwrap();

        assert_eq!(
            set.element(field).as_field().unwrap().field_type,
            FieldType::Message(msg_b)
        );

        // `Kind` is resolved from inside msg_a.Inner up to the package scope
        let kind_field = set.find("test.proto/msg_a/Inner/kind").unwrap();
        let kind = set.find("test.proto/Kind").unwrap();
        assert_eq!(
            set.element(kind_field).as_field().unwrap().field_type,
            FieldType::Enum(kind)
        );

        let method = set.find("test.proto/svc_a/method_a_1").unwrap();
        let body = set.element(method).as_method().unwrap();
        assert_eq!(set.name(body.input), "msg_a");
        assert_eq!(body.output, msg_b);
    }

    #[test]
    fn ancestors_start_at_file() {
        let set = sample();
        let field = set.find("test.proto/msg_a/Inner/kind").unwrap();
        let names: Vec<&str> = set
            .ancestors(field)
            .into_iter()
            .map(|id| set.name(id))
            .collect();

        assert_eq!(names, vec!["test.proto", "msg_a", "Inner"]);
        assert_eq!(set.file_of(field), set.file_by_name("test.proto").unwrap());
    }

    #[test]
    fn map_entry_types_resolved() {
        let set = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_message(MessageDef::new("msg_a").with_map_field(
                "field_a_1",
                1,
                ScalarType::String,
                "msg_b",
            ))
            .with_message(MessageDef::new("msg_b"))])
        .unwrap();

        let field = set.find("test.proto/msg_a/field_a_1").unwrap();
        let entry = set.find("test.proto/msg_a/FieldA1Entry").unwrap();
        let msg_b = set.find("test.proto/msg_b").unwrap();

        assert!(set.element(entry).is_map_entry());
        assert_eq!(
            set.map_entry_types(field),
            Some((FieldType::Scalar(ScalarType::String), FieldType::Message(msg_b)))
        );
    }

    #[test]
    fn unresolved_type_is_an_error() {
        let result = SchemaSet::from_defs(vec![FileDef::new("test.proto").with_message(
            MessageDef::new("msg_a").with_field(FieldDef::named("f", 1, "missing")),
        )]);

        assert_eq!(
            result.unwrap_err(),
            SchemaError::UnresolvedType {
                path: "test.proto/msg_a/f".to_string(),
                type_name: "missing".to_string(),
            }
        );
    }

    #[test]
    fn method_must_reference_message() {
        let result = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_enum(EnumDef::new("Kind").with_value("A", 0))
            .with_service(ServiceDef::new("svc").with_method(MethodDef::new("m", "Kind", "Kind")))]);

        assert!(matches!(result, Err(SchemaError::InvalidReference { .. })));
    }

    #[test]
    fn duplicate_type_is_an_error() {
        let result = SchemaSet::from_defs(vec![
            FileDef::new("a.proto").with_message(MessageDef::new("Dup")),
            FileDef::new("b.proto").with_message(MessageDef::new("Dup")),
        ]);

        assert_eq!(result.unwrap_err(), SchemaError::DuplicateType(".Dup".to_string()));
    }
}
