//! Unlinked schema declarations
//!
//! `FileDef` and friends describe a schema the way it is written: type
//! references are names, not ids. [`SchemaSet::from_defs`] links them into a
//! graph in two passes. The first pass allocates every container element and
//! registers its fully-qualified name, the second resolves field and method
//! type names (which may point forward or into another file) and allocates the
//! fields and methods themselves.

use std::collections::HashMap;

use crate::path;
use crate::schema::{
    package_scope, Comments, Element, ElementBody, ElementId, ElementKind, EnumBody, EnumValueBody,
    FieldBody, FieldType, FileBody, FileOption, Label, MessageBody, MethodBody, ScalarType,
    SchemaError, SchemaSet, ServiceBody, Syntax,
};

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Scalar(ScalarType),

    /// Message or enum name, relative to the declaring scope or fully
    /// qualified with a leading `.`
    Named(String),
}

impl From<ScalarType> for TypeRef {
    fn from(scalar: ScalarType) -> Self {
        Self::Scalar(scalar)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for TypeRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub type_ref: TypeRef,
    pub comments: Comments,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, number: i32, type_ref: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            number,
            label: Label::Optional,
            type_ref: type_ref.into(),
            comments: Comments::default(),
        }
    }

    /// Field of a scalar type
    pub fn scalar(name: impl Into<String>, number: i32, scalar: ScalarType) -> Self {
        Self::new(name, number, TypeRef::Scalar(scalar))
    }

    /// Field referencing a message or enum by name
    pub fn named(name: impl Into<String>, number: i32, type_name: impl Into<String>) -> Self {
        Self::new(name, number, TypeRef::Named(type_name.into()))
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    pub fn repeated(self) -> Self {
        self.with_label(Label::Repeated)
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageDef {
    pub name: String,
    pub map_entry: bool,
    pub fields: Vec<FieldDef>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
    pub comments: Comments,
}

impl MessageDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_message(mut self, message: MessageDef) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_enum(mut self, enum_def: EnumDef) -> Self {
        self.enums.push(enum_def);
        self
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }

    pub fn as_map_entry(mut self) -> Self {
        self.map_entry = true;
        self
    }

    /// Add a `map<K, V>` field together with its synthetic entry message,
    /// named the way protoc names it (`field_a_1` -> `FieldA1Entry`)
    pub fn with_map_field(
        mut self,
        name: impl Into<String>,
        number: i32,
        key: impl Into<TypeRef>,
        value: impl Into<TypeRef>,
    ) -> Self {
        let name = name.into();
        let entry_name = map_entry_name(&name);
        self.messages.push(
            MessageDef::new(entry_name.clone())
                .as_map_entry()
                .with_field(FieldDef::new("key", 1, key))
                .with_field(FieldDef::new("value", 2, value)),
        );
        self.fields
            .push(FieldDef::named(name, number, entry_name).repeated());
        self
    }
}

/// Name protoc gives to the entry message of a map field
pub fn map_entry_name(field_name: &str) -> String {
    let mut result = String::with_capacity(field_name.len() + 5);
    let mut upper_next = true;
    for c in field_name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            result.extend(c.to_uppercase());
            upper_next = false;
        } else {
            result.push(c);
        }
    }
    result.push_str("Entry");
    result
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumValueDef {
    pub name: String,
    pub number: i32,
    pub comments: Comments,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<EnumValueDef>,
    pub comments: Comments,
}

impl EnumDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push(EnumValueDef {
            name: name.into(),
            number,
            comments: Comments::default(),
        });
        self
    }

    pub fn with_value_def(mut self, value: EnumValueDef) -> Self {
        self.values.push(value);
        self
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodDef {
    pub name: String,
    pub input: String,
    pub output: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub comments: Comments,
}

impl MethodDef {
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_streaming(mut self, client: bool, server: bool) -> Self {
        self.client_streaming = client;
        self.server_streaming = server;
        self
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceDef {
    pub name: String,
    pub methods: Vec<MethodDef>,
    pub comments: Comments,
}

impl ServiceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileDef {
    pub name: String,
    pub syntax: Syntax,
    pub package: String,
    pub dependencies: Vec<String>,
    pub options: Vec<FileOption>,
    pub comments: Comments,
    pub syntax_comments: Comments,
    pub package_comments: Comments,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
    pub services: Vec<ServiceDef>,
}

impl FileDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_option(mut self, option: FileOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_message(mut self, message: MessageDef) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_enum(mut self, enum_def: EnumDef) -> Self {
        self.enums.push(enum_def);
        self
    }

    pub fn with_service(mut self, service: ServiceDef) -> Self {
        self.services.push(service);
        self
    }
}

struct PendingField {
    parent: ElementId,
    parent_path: String,
    scope: String,
    def: FieldDef,
}

struct PendingMethod {
    parent: ElementId,
    parent_path: String,
    scope: String,
    def: MethodDef,
}

#[derive(Default)]
struct Linker {
    set: SchemaSet,
    fields: Vec<PendingField>,
    methods: Vec<PendingMethod>,
}

pub(crate) fn link(files: Vec<FileDef>) -> Result<SchemaSet, SchemaError> {
    let mut linker = Linker::default();
    for file in files {
        linker.declare_file(file)?;
    }
    linker.wire()?;
    Ok(linker.set)
}

impl Linker {
    fn push(&mut self, element: Element, path: String) -> Result<ElementId, SchemaError> {
        if self.set.by_path.contains_key(&path) {
            return Err(SchemaError::DuplicatePath(path));
        }
        let id = ElementId(self.set.elements.len());
        self.set.elements.push(element);
        self.set.by_path.insert(path, id);
        Ok(id)
    }

    fn register_type(&mut self, full_name: String, id: ElementId) -> Result<(), SchemaError> {
        if self.set.by_full_name.contains_key(&full_name) {
            return Err(SchemaError::DuplicateType(full_name));
        }
        self.set.by_full_name.insert(full_name, id);
        Ok(())
    }

    /// Record `child` in the matching child list of `parent`
    fn attach(&mut self, parent: ElementId, child: ElementId, kind: ElementKind) {
        match (&mut self.set.elements[parent.0].body, kind) {
            (ElementBody::File(f), ElementKind::Message) => f.messages.push(child),
            (ElementBody::File(f), ElementKind::Enum) => f.enums.push(child),
            (ElementBody::File(f), ElementKind::Service) => f.services.push(child),
            (ElementBody::Message(m), ElementKind::Message) => m.messages.push(child),
            (ElementBody::Message(m), ElementKind::Enum) => m.enums.push(child),
            (ElementBody::Message(m), ElementKind::Field) => m.fields.push(child),
            (ElementBody::Enum(e), ElementKind::EnumValue) => e.values.push(child),
            (ElementBody::Service(s), ElementKind::Method) => s.methods.push(child),
            // declarations can only produce the pairs above
            _ => {}
        }
    }

    fn declare_file(&mut self, def: FileDef) -> Result<(), SchemaError> {
        let scope = package_scope(&def.package);
        let file_path = def.name.clone();
        let body = FileBody {
            syntax: def.syntax,
            package: def.package,
            dependencies: def.dependencies,
            options: def.options,
            comments: def.comments,
            syntax_comments: def.syntax_comments,
            package_comments: def.package_comments,
            ..FileBody::default()
        };
        let id = self.push(
            Element {
                name: def.name,
                parent: None,
                body: ElementBody::File(body),
            },
            file_path.clone(),
        )?;
        self.set.files.push(id);

        for message in def.messages {
            self.declare_message(message, id, &file_path, &scope)?;
        }
        for enum_def in def.enums {
            self.declare_enum(enum_def, id, &file_path, &scope)?;
        }
        for service in def.services {
            self.declare_service(service, id, &file_path, &scope)?;
        }
        Ok(())
    }

    fn declare_message(
        &mut self,
        def: MessageDef,
        parent: ElementId,
        parent_path: &str,
        scope: &str,
    ) -> Result<(), SchemaError> {
        let full_name = format!("{}.{}", scope, def.name);
        let message_path = path::concat(parent_path, &def.name);
        let body = MessageBody {
            map_entry: def.map_entry,
            comments: def.comments,
            ..MessageBody::default()
        };
        let id = self.push(
            Element {
                name: def.name,
                parent: Some(parent),
                body: ElementBody::Message(body),
            },
            message_path.clone(),
        )?;
        self.attach(parent, id, ElementKind::Message);
        self.register_type(full_name.clone(), id)?;

        for message in def.messages {
            self.declare_message(message, id, &message_path, &full_name)?;
        }
        for enum_def in def.enums {
            self.declare_enum(enum_def, id, &message_path, &full_name)?;
        }
        for field in def.fields {
            self.fields.push(PendingField {
                parent: id,
                parent_path: message_path.clone(),
                scope: full_name.clone(),
                def: field,
            });
        }
        Ok(())
    }

    fn declare_enum(
        &mut self,
        def: EnumDef,
        parent: ElementId,
        parent_path: &str,
        scope: &str,
    ) -> Result<(), SchemaError> {
        let enum_path = path::concat(parent_path, &def.name);
        let id = self.push(
            Element {
                name: def.name.clone(),
                parent: Some(parent),
                body: ElementBody::Enum(EnumBody {
                    values: Vec::new(),
                    comments: def.comments,
                }),
            },
            enum_path.clone(),
        )?;
        self.attach(parent, id, ElementKind::Enum);
        self.register_type(format!("{}.{}", scope, def.name), id)?;

        for value in def.values {
            let value_path = path::concat(&enum_path, &value.name);
            let value_id = self.push(
                Element {
                    name: value.name,
                    parent: Some(id),
                    body: ElementBody::EnumValue(EnumValueBody {
                        number: value.number,
                        comments: value.comments,
                    }),
                },
                value_path,
            )?;
            self.attach(id, value_id, ElementKind::EnumValue);
        }
        Ok(())
    }

    fn declare_service(
        &mut self,
        def: ServiceDef,
        parent: ElementId,
        parent_path: &str,
        scope: &str,
    ) -> Result<(), SchemaError> {
        let service_path = path::concat(parent_path, &def.name);
        let id = self.push(
            Element {
                name: def.name,
                parent: Some(parent),
                body: ElementBody::Service(ServiceBody {
                    methods: Vec::new(),
                    comments: def.comments,
                }),
            },
            service_path.clone(),
        )?;
        self.attach(parent, id, ElementKind::Service);

        for method in def.methods {
            self.methods.push(PendingMethod {
                parent: id,
                parent_path: service_path.clone(),
                scope: scope.to_string(),
                def: method,
            });
        }
        Ok(())
    }

    /// Second pass: resolve type names now that every type is registered
    fn wire(&mut self) -> Result<(), SchemaError> {
        for pending in std::mem::take(&mut self.fields) {
            let field_path = path::concat(&pending.parent_path, &pending.def.name);
            let field_type = match &pending.def.type_ref {
                TypeRef::Scalar(scalar) => FieldType::Scalar(*scalar),
                TypeRef::Named(type_name) => {
                    let target = self.resolve(&pending.scope, type_name, &field_path)?;
                    match self.set.elements[target.0].kind() {
                        ElementKind::Message => FieldType::Message(target),
                        ElementKind::Enum => FieldType::Enum(target),
                        other => {
                            return Err(SchemaError::InvalidReference {
                                path: field_path,
                                type_name: type_name.clone(),
                                reason: format!("a field cannot have a {} type", other),
                            })
                        }
                    }
                }
            };
            let id = self.push(
                Element {
                    name: pending.def.name,
                    parent: Some(pending.parent),
                    body: ElementBody::Field(FieldBody {
                        number: pending.def.number,
                        label: pending.def.label,
                        field_type,
                        comments: pending.def.comments,
                    }),
                },
                field_path,
            )?;
            self.attach(pending.parent, id, ElementKind::Field);
        }

        for pending in std::mem::take(&mut self.methods) {
            let method_path = path::concat(&pending.parent_path, &pending.def.name);
            let input = self.resolve_message(&pending.scope, &pending.def.input, &method_path)?;
            let output = self.resolve_message(&pending.scope, &pending.def.output, &method_path)?;
            let id = self.push(
                Element {
                    name: pending.def.name,
                    parent: Some(pending.parent),
                    body: ElementBody::Method(MethodBody {
                        input,
                        output,
                        client_streaming: pending.def.client_streaming,
                        server_streaming: pending.def.server_streaming,
                        comments: pending.def.comments,
                    }),
                },
                method_path,
            )?;
            self.attach(pending.parent, id, ElementKind::Method);
        }
        Ok(())
    }

    fn resolve_message(
        &self,
        scope: &str,
        type_name: &str,
        from_path: &str,
    ) -> Result<ElementId, SchemaError> {
        let target = self.resolve(scope, type_name, from_path)?;
        if self.set.elements[target.0].kind() != ElementKind::Message {
            return Err(SchemaError::InvalidReference {
                path: from_path.to_string(),
                type_name: type_name.to_string(),
                reason: "methods must use message types".to_string(),
            });
        }
        Ok(target)
    }

    /// Resolve a type name from `scope` outwards, the way protoc does
    fn resolve(&self, scope: &str, type_name: &str, from_path: &str) -> Result<ElementId, SchemaError> {
        if type_name.starts_with('.') {
            return self.set.find_type(type_name).ok_or_else(|| SchemaError::UnresolvedType {
                path: from_path.to_string(),
                type_name: type_name.to_string(),
            });
        }

        let mut current = scope;
        loop {
            let candidate = format!("{}.{}", current, type_name);
            if let Some(id) = self.set.find_type(&candidate) {
                return Ok(id);
            }
            if current.is_empty() {
                break;
            }
            current = match current.rfind('.') {
                Some(idx) => &current[..idx],
                None => "",
            };
        }

        Err(SchemaError::UnresolvedType {
            path: from_path.to_string(),
            type_name: type_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_entry_naming() {
        assert_eq!(map_entry_name("field_a_1"), "FieldA1Entry");
        assert_eq!(map_entry_name("tags"), "TagsEntry");
        assert_eq!(map_entry_name("by_id"), "ByIdEntry");
    }

    #[test]
    fn forward_and_cross_file_references() {
        let set = SchemaSet::from_defs(vec![
            FileDef::new("a.proto")
                .with_package("pkg")
                .with_dependency("b.proto")
                .with_message(
                    MessageDef::new("A")
                        .with_field(FieldDef::named("b", 1, "B"))
                        .with_field(FieldDef::named("later", 2, "Later")),
                )
                .with_message(MessageDef::new("Later")),
            FileDef::new("b.proto")
                .with_package("pkg")
                .with_message(MessageDef::new("B").with_field(FieldDef::named("a", 1, ".pkg.A"))),
        ])
        .unwrap();

        let b_field = set.find("a.proto/A/b").unwrap();
        let b = set.find("b.proto/B").unwrap();
        assert_eq!(set.element(b_field).as_field().unwrap().field_type, FieldType::Message(b));

        // mutual recursion between files
        let a_field = set.find("b.proto/B/a").unwrap();
        let a = set.find("a.proto/A").unwrap();
        assert_eq!(set.element(a_field).as_field().unwrap().field_type, FieldType::Message(a));
    }

    #[test]
    fn field_order_is_preserved() {
        let set = SchemaSet::from_defs(vec![FileDef::new("t.proto").with_message(
            MessageDef::new("M")
                .with_field(FieldDef::scalar("z", 1, ScalarType::Int32))
                .with_field(FieldDef::scalar("a", 2, ScalarType::Int32))
                .with_field(FieldDef::scalar("m", 3, ScalarType::Int32)),
        )])
        .unwrap();

        let message = set.find("t.proto/M").unwrap();
        let names: Vec<&str> = set
            .element(message)
            .as_message()
            .unwrap()
            .fields
            .iter()
            .map(|id| set.name(*id))
            .collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn duplicate_path_is_an_error() {
        let result = SchemaSet::from_defs(vec![FileDef::new("t.proto").with_message(
            MessageDef::new("M")
                .with_field(FieldDef::scalar("x", 1, ScalarType::Int32))
                .with_field(FieldDef::scalar("x", 2, ScalarType::Int32)),
        )]);

        assert_eq!(
            result.unwrap_err(),
            SchemaError::DuplicatePath("t.proto/M/x".to_string())
        );
    }
}
