//! Filtered schema reconstruction
//!
//! Builds a new [`SchemaSet`] holding exactly the included elements of a
//! source schema. The first pass creates a shell for every kept file, message,
//! enum and service and records it by path. The second pass adds fields and
//! methods, resolving each type reference through the shell table by the
//! referenced element's own path. The shells are then assembled into
//! declarations and linked.

use std::collections::HashMap;

use protofilter_core::defs::{
    EnumDef, EnumValueDef, FieldDef, FileDef, MessageDef, MethodDef, ServiceDef, TypeRef,
};
use protofilter_core::schema::package_scope;
use protofilter_core::{ElementId, FieldType, Label, SchemaError, SchemaSet};

use crate::error::FilterError;
use crate::resolver::InclusionMap;

type ShellId = usize;

enum ShellBody {
    File(FileDef),
    Message(MessageDef),
    Enum(EnumDef),
    Service(ServiceDef),
}

/// A kept container, filled in over both passes
struct Shell {
    full_name: String,
    file: ShellId,
    children: Vec<ShellId>,
    body: ShellBody,
}

/// Per-run reconstruction state
pub struct DescriptorRebuilder<'a> {
    schema: &'a SchemaSet,
    inclusion: &'a InclusionMap,
    shells: Vec<Shell>,
    by_path: HashMap<String, ShellId>,

    /// Files each kept file references, in first-use order
    references: HashMap<ShellId, Vec<String>>,
}

impl<'a> DescriptorRebuilder<'a> {
    fn new(schema: &'a SchemaSet, inclusion: &'a InclusionMap) -> Self {
        Self {
            schema,
            inclusion,
            shells: Vec::new(),
            by_path: HashMap::new(),
            references: HashMap::new(),
        }
    }

    /// Rebuild the included part of `schema`
    pub fn rebuild(schema: &'a SchemaSet, inclusion: &'a InclusionMap) -> Result<SchemaSet, FilterError> {
        let mut rebuilder = Self::new(schema, inclusion);

        for &file in schema.files() {
            rebuilder.shape_file(file);
        }
        tracing::debug!(shells = rebuilder.shells.len(), "Shaped filtered schema");

        for &file in schema.files() {
            rebuilder.wire_file(file)?;
        }

        let files = rebuilder.assemble();
        tracing::debug!(files = files.len(), "Assembled filtered schema");

        SchemaSet::from_defs(files).map_err(integrity_error)
    }

    fn is_kept(&self, id: ElementId) -> bool {
        self.inclusion.is_included(&self.schema.path_of(id))
    }

    fn add_shell(&mut self, id: ElementId, parent: Option<ShellId>, body: ShellBody) -> ShellId {
        let shell_id = self.shells.len();
        let name = self.schema.name(id);
        let (full_name, file) = match (parent, &body) {
            (_, ShellBody::File(def)) => (package_scope(&def.package), shell_id),
            (Some(parent), _) => (
                format!("{}.{}", self.shells[parent].full_name, name),
                self.shells[parent].file,
            ),
            (None, _) => (format!(".{}", name), shell_id),
        };

        if let Some(parent) = parent {
            self.shells[parent].children.push(shell_id);
        }
        self.shells.push(Shell {
            full_name,
            file,
            children: Vec::new(),
            body,
        });
        self.by_path.insert(self.schema.path_of(id), shell_id);
        shell_id
    }

    fn shell_for(&self, id: ElementId) -> Result<ShellId, FilterError> {
        let path = self.schema.path_of(id);
        self.by_path.get(&path).copied().ok_or_else(|| FilterError::Integrity {
            path,
            detail: "kept element has no rebuilt container".to_string(),
        })
    }

    // Pass 1

    fn shape_file(&mut self, id: ElementId) {
        let schema = self.schema;
        let Some(body) = schema.element(id).as_file() else {
            return;
        };
        if !self.is_kept(id) {
            return;
        }

        let def = FileDef {
            name: schema.name(id).to_string(),
            syntax: body.syntax,
            package: body.package.clone(),
            dependencies: body.dependencies.clone(),
            options: body.options.clone(),
            comments: body.comments.clone(),
            syntax_comments: body.syntax_comments.clone(),
            package_comments: body.package_comments.clone(),
            ..FileDef::default()
        };
        let shell = self.add_shell(id, None, ShellBody::File(def));

        for &message in &body.messages {
            self.shape_message(message, shell);
        }
        for &enum_id in &body.enums {
            self.shape_enum(enum_id, shell);
        }
        for &service in &body.services {
            self.shape_service(service, shell);
        }
    }

    fn shape_message(&mut self, id: ElementId, parent: ShellId) {
        let schema = self.schema;
        let element = schema.element(id);
        let Some(body) = element.as_message() else {
            return;
        };
        // entries are synthesized again when their map field is wired
        if body.map_entry || !self.is_kept(id) {
            return;
        }

        let def = MessageDef::new(element.name.clone()).with_comments(body.comments.clone());
        let shell = self.add_shell(id, Some(parent), ShellBody::Message(def));

        for &nested in &body.messages {
            self.shape_message(nested, shell);
        }
        for &enum_id in &body.enums {
            self.shape_enum(enum_id, shell);
        }
    }

    fn shape_enum(&mut self, id: ElementId, parent: ShellId) {
        let schema = self.schema;
        let element = schema.element(id);
        let Some(body) = element.as_enum() else {
            return;
        };
        if !self.is_kept(id) {
            return;
        }

        let mut def = EnumDef::new(element.name.clone()).with_comments(body.comments.clone());
        for &value in &body.values {
            let Some(value_body) = schema.element(value).as_enum_value() else {
                continue;
            };
            if self.is_kept(value) {
                def = def.with_value_def(EnumValueDef {
                    name: schema.name(value).to_string(),
                    number: value_body.number,
                    comments: value_body.comments.clone(),
                });
            }
        }
        self.add_shell(id, Some(parent), ShellBody::Enum(def));
    }

    fn shape_service(&mut self, id: ElementId, parent: ShellId) {
        let schema = self.schema;
        let element = schema.element(id);
        let Some(body) = element.as_service() else {
            return;
        };
        if !self.is_kept(id) {
            return;
        }

        let def = ServiceDef::new(element.name.clone()).with_comments(body.comments.clone());
        self.add_shell(id, Some(parent), ShellBody::Service(def));
    }

    // Pass 2

    fn wire_file(&mut self, id: ElementId) -> Result<(), FilterError> {
        let schema = self.schema;
        let Some(body) = schema.element(id).as_file() else {
            return Ok(());
        };
        if !self.is_kept(id) {
            return Ok(());
        }

        for &message in &body.messages {
            self.wire_message(message)?;
        }
        for &service in &body.services {
            self.wire_service(service)?;
        }
        Ok(())
    }

    fn wire_message(&mut self, id: ElementId) -> Result<(), FilterError> {
        let schema = self.schema;
        let Some(body) = schema.element(id).as_message() else {
            return Ok(());
        };
        if body.map_entry || !self.is_kept(id) {
            return Ok(());
        }
        let shell = self.shell_for(id)?;

        for &nested in &body.messages {
            self.wire_message(nested)?;
        }
        for &field in &body.fields {
            if self.is_kept(field) {
                self.wire_field(field, shell)?;
            }
        }
        Ok(())
    }

    fn wire_field(&mut self, id: ElementId, shell: ShellId) -> Result<(), FilterError> {
        let schema = self.schema;
        let element = schema.element(id);
        let Some(body) = element.as_field() else {
            return Ok(());
        };

        let (label, type_ref, entry) = match (schema.map_entry_types(id), body.field_type) {
            (Some((key, value)), FieldType::Message(source_entry)) => {
                let entry_name = schema.name(source_entry).to_string();
                let entry = MessageDef::new(entry_name.clone())
                    .as_map_entry()
                    .with_field(FieldDef::new("key", 1, self.type_ref(id, key, shell)?))
                    .with_field(FieldDef::new("value", 2, self.type_ref(id, value, shell)?));
                let type_name = format!("{}.{}", self.shells[shell].full_name, entry_name);
                (Label::Repeated, TypeRef::Named(type_name), Some(entry))
            }
            (_, field_type) => (body.label, self.type_ref(id, field_type, shell)?, None),
        };

        if let ShellBody::Message(def) = &mut self.shells[shell].body {
            if let Some(entry) = entry {
                def.messages.push(entry);
            }
            def.fields.push(FieldDef {
                name: element.name.clone(),
                number: body.number,
                label,
                type_ref,
                comments: body.comments.clone(),
            });
        }
        Ok(())
    }

    fn wire_service(&mut self, id: ElementId) -> Result<(), FilterError> {
        let schema = self.schema;
        let Some(body) = schema.element(id).as_service() else {
            return Ok(());
        };
        if !self.is_kept(id) {
            return Ok(());
        }
        let shell = self.shell_for(id)?;

        for &method in &body.methods {
            let Some(method_body) = schema.element(method).as_method() else {
                continue;
            };
            if !self.is_kept(method) {
                continue;
            }

            let input = self.reference(method, method_body.input, shell)?;
            let output = self.reference(method, method_body.output, shell)?;
            let def = MethodDef::new(schema.name(method), input, output)
                .with_streaming(method_body.client_streaming, method_body.server_streaming)
                .with_comments(method_body.comments.clone());

            if let ShellBody::Service(service) = &mut self.shells[shell].body {
                service.methods.push(def);
            }
        }
        Ok(())
    }

    fn type_ref(&mut self, from: ElementId, field_type: FieldType, shell: ShellId) -> Result<TypeRef, FilterError> {
        match field_type {
            FieldType::Scalar(scalar) => Ok(TypeRef::Scalar(scalar)),
            FieldType::Message(target) | FieldType::Enum(target) => {
                Ok(TypeRef::Named(self.reference(from, target, shell)?))
            }
        }
    }

    /// Fully-qualified name of a rebuilt target, recording cross-file use
    fn reference(&mut self, from: ElementId, target: ElementId, shell: ShellId) -> Result<String, FilterError> {
        let target_path = self.schema.path_of(target);
        let Some(&target_shell) = self.by_path.get(&target_path) else {
            return Err(FilterError::Integrity {
                path: self.schema.path_of(from),
                detail: format!("referenced type {} was not rebuilt", target_path),
            });
        };

        let from_file = self.shells[shell].file;
        let target_file = self.shells[target_shell].file;
        if from_file != target_file {
            if let ShellBody::File(def) = &self.shells[target_file].body {
                let name = def.name.clone();
                let used = self.references.entry(from_file).or_default();
                if !used.contains(&name) {
                    used.push(name);
                }
            }
        }

        Ok(self.shells[target_shell].full_name.clone())
    }

    // Finalization

    fn assemble(mut self) -> Vec<FileDef> {
        let file_shells: Vec<ShellId> = (0..self.shells.len())
            .filter(|&id| matches!(self.shells[id].body, ShellBody::File(_)))
            .collect();

        for &file in &file_shells {
            let used = self.references.remove(&file).unwrap_or_default();
            if let ShellBody::File(def) = &mut self.shells[file].body {
                def.dependencies = narrow_dependencies(&def.dependencies, used);
            }
        }

        let mut slots: Vec<Option<Shell>> = self.shells.into_iter().map(Some).collect();
        file_shells
            .into_iter()
            .filter_map(|file| match assemble_shell(&mut slots, file) {
                Some(ShellBody::File(def)) => Some(def),
                _ => None,
            })
            .collect()
    }
}

/// Keep the imports still in use, in source order, then any missing ones
fn narrow_dependencies(original: &[String], used: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = original
        .iter()
        .filter(|dep| used.contains(dep))
        .cloned()
        .collect();
    for dep in used {
        if !result.contains(&dep) {
            result.push(dep);
        }
    }
    result
}

fn assemble_shell(slots: &mut [Option<Shell>], id: ShellId) -> Option<ShellBody> {
    let shell = slots.get_mut(id)?.take()?;
    let mut body = shell.body;

    for child in shell.children {
        let Some(child_body) = assemble_shell(slots, child) else {
            continue;
        };
        match (&mut body, child_body) {
            (ShellBody::File(def), ShellBody::Message(m)) => def.messages.push(m),
            (ShellBody::File(def), ShellBody::Enum(e)) => def.enums.push(e),
            (ShellBody::File(def), ShellBody::Service(s)) => def.services.push(s),
            (ShellBody::Message(def), ShellBody::Message(m)) => def.messages.push(m),
            (ShellBody::Message(def), ShellBody::Enum(e)) => def.enums.push(e),
            _ => {}
        }
    }
    Some(body)
}

fn integrity_error(err: SchemaError) -> FilterError {
    let path = match &err {
        SchemaError::UnresolvedType { path, .. } | SchemaError::InvalidReference { path, .. } => path.clone(),
        SchemaError::DuplicatePath(path) | SchemaError::DuplicateType(path) => path.clone(),
    };
    FilterError::Integrity {
        path,
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{InclusionResolver, InclusionState};
    use protofilter_core::{RuleForest, ScalarType, Syntax};

    fn filtered(schema: &SchemaSet, yaml: &str) -> SchemaSet {
        let rules = RuleForest::from_yaml(yaml).unwrap();
        let map = InclusionResolver::resolve(schema, &rules).unwrap();
        DescriptorRebuilder::rebuild(schema, &map).unwrap()
    }

    fn field_names(schema: &SchemaSet, message: &str) -> Vec<String> {
        let id = schema.find(message).unwrap();
        schema
            .element(id)
            .as_message()
            .unwrap()
            .fields
            .iter()
            .map(|&f| schema.name(f).to_string())
            .collect()
    }

    #[test]
    fn keeps_only_included_fields() {
        let schema = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_syntax(Syntax::Proto3)
            .with_message(
                MessageDef::new("msg_a")
                    .with_field(FieldDef::scalar("field_a_1", 1, ScalarType::String))
                    .with_field(FieldDef::scalar("field_a_2", 2, ScalarType::Int32).repeated()),
            )
            .with_message(MessageDef::new("msg_b"))])
        .unwrap();

        let out = filtered(&schema, "include:\n  - test.proto:\n    - msg_a:\n      - field_a_2\n");
        assert_eq!(field_names(&out, "test.proto/msg_a"), vec!["field_a_2"]);
        assert!(out.find("test.proto/msg_b").is_none());

        let field = out.find("test.proto/msg_a/field_a_2").unwrap();
        let body = out.element(field).as_field().unwrap();
        assert_eq!(body.number, 2);
        assert_eq!(body.label, Label::Repeated);
        assert_eq!(body.field_type, FieldType::Scalar(ScalarType::Int32));

        let file = out.element(out.files()[0]).as_file().unwrap();
        assert_eq!(file.syntax, Syntax::Proto3);
    }

    #[test]
    fn rewires_cross_file_references_and_narrows_imports() {
        let schema = SchemaSet::from_defs(vec![
            FileDef::new("common.proto")
                .with_package("common")
                .with_message(MessageDef::new("Empty"))
                .with_enum(EnumDef::new("Kind").with_value("A", 0).with_value("B", 1)),
            FileDef::new("unused.proto").with_package("unused").with_message(MessageDef::new("U")),
            FileDef::new("api.proto")
                .with_package("api")
                .with_dependency("unused.proto")
                .with_dependency("common.proto")
                .with_message(
                    MessageDef::new("Request")
                        .with_field(FieldDef::named("kind", 1, ".common.Kind"))
                        .with_field(FieldDef::named("u", 2, ".unused.U")),
                )
                .with_service(ServiceDef::new("Api").with_method(MethodDef::new("Call", "Request", ".common.Empty"))),
        ])
        .unwrap();

        let yaml = "
include:
  - api.proto:
    - Api
exclude:
  - api.proto:
    - Request:
      - u
";
        let out = filtered(&schema, yaml);

        let names: Vec<&str> = out.files().iter().map(|&f| out.name(f)).collect();
        assert_eq!(names, vec!["common.proto", "api.proto"]);

        let api = out.file_by_name("api.proto").unwrap();
        assert_eq!(out.element(api).as_file().unwrap().dependencies, vec!["common.proto"]);

        let kind = out.find("common.proto/Kind").unwrap();
        let field = out.find("api.proto/Request/kind").unwrap();
        assert_eq!(out.element(field).as_field().unwrap().field_type, FieldType::Enum(kind));
        assert_eq!(out.element(kind).as_enum().unwrap().values.len(), 2);

        let method = out.find("api.proto/Api/Call").unwrap();
        let empty = out.find("common.proto/Empty").unwrap();
        assert_eq!(out.element(method).as_method().unwrap().output, empty);
    }

    #[test]
    fn map_fields_get_a_fresh_entry() {
        let schema = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_message(MessageDef::new("msg_a").with_map_field("labels", 1, ScalarType::String, "msg_b"))
            .with_message(MessageDef::new("msg_b").with_field(FieldDef::scalar("v", 1, ScalarType::Bool)))])
        .unwrap();

        let out = filtered(&schema, "include:\n  - test.proto:\n    - msg_a\n");
        let field = out.find("test.proto/msg_a/labels").unwrap();
        let msg_b = out.find("test.proto/msg_b").unwrap();
        assert_eq!(
            out.map_entry_types(field),
            Some((FieldType::Scalar(ScalarType::String), FieldType::Message(msg_b)))
        );
        assert!(out.element(out.find("test.proto/msg_a/LabelsEntry").unwrap()).is_map_entry());
    }

    #[test]
    fn keeps_nested_container_of_referenced_type() {
        let schema = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_message(MessageDef::new("A").with_field(FieldDef::named("inner", 1, "Outer.Inner")))
            .with_message(
                MessageDef::new("Outer")
                    .with_message(MessageDef::new("Inner"))
                    .with_field(FieldDef::scalar("x", 1, ScalarType::Bool)),
            )])
        .unwrap();

        let out = filtered(&schema, "include:\n  - test.proto:\n    - A\n");
        assert!(out.find("test.proto/Outer/Inner").is_some());
        assert!(field_names(&out, "test.proto/Outer").is_empty());
    }

    #[test]
    fn missing_target_is_an_integrity_error() {
        let schema = SchemaSet::from_defs(vec![FileDef::new("test.proto")
            .with_message(MessageDef::new("msg_a").with_field(FieldDef::named("b", 1, "msg_b")))
            .with_message(MessageDef::new("msg_b"))])
        .unwrap();

        // a map the resolver would never produce: the field is kept, its type is not
        let mut map = InclusionMap::default();
        map.set("test.proto".to_string(), InclusionState::IncludedImplicit);
        map.set("test.proto/msg_a".to_string(), InclusionState::IncludedExplicit);
        map.set("test.proto/msg_a/b".to_string(), InclusionState::IncludedExplicit);

        let err = DescriptorRebuilder::rebuild(&schema, &map).unwrap_err();
        assert_eq!(
            err,
            FilterError::Integrity {
                path: "test.proto/msg_a/b".to_string(),
                detail: "referenced type test.proto/msg_b was not rebuilt".to_string(),
            }
        );
    }

    #[test]
    fn nothing_included_yields_empty_set() {
        let schema = SchemaSet::from_defs(vec![FileDef::new("test.proto").with_message(MessageDef::new("A"))]).unwrap();
        let out = filtered(&schema, "");
        assert!(out.files().is_empty());
    }
}
