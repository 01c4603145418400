//! Binary FileDescriptorSet loading
//!
//! Decodes the output of `protoc --descriptor_set_out` (ideally with
//! `--include_source_info` so comments survive) into unlinked [`FileDef`]s.

use prost::Message;
use prost_types::field_descriptor_proto::{Label as ProtoLabel, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, FileOptions, ServiceDescriptorProto, SourceCodeInfo,
};
use std::collections::HashMap;
use std::path::Path;

use protofilter_core::defs::{
    EnumDef, EnumValueDef, FieldDef, FileDef, MessageDef, MethodDef, ServiceDef, TypeRef,
};
use protofilter_core::schema::{
    Comments, FileOption, Label, OptionValue, ScalarType, SchemaError, SchemaSet, Syntax,
};

// descriptor.proto field numbers used in SourceCodeInfo paths
const FILE_PACKAGE: i32 = 2;
const FILE_MESSAGE: i32 = 4;
const FILE_ENUM: i32 = 5;
const FILE_SERVICE: i32 = 6;
const FILE_SYNTAX: i32 = 12;
const MESSAGE_FIELD: i32 = 2;
const MESSAGE_NESTED: i32 = 3;
const MESSAGE_ENUM: i32 = 4;
const ENUM_VALUE: i32 = 2;
const SERVICE_METHOD: i32 = 2;

/// Decoded descriptor set, not yet linked
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    files: Vec<FileDef>,
}

impl DescriptorSet {
    /// Load a binary descriptor set from file
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let bytes = std::fs::read(path)
            .map_err(|e| DescriptorError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_bytes(&bytes)
    }

    /// Decode a binary descriptor set
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let set = FileDescriptorSet::decode(bytes)
            .map_err(|e| DescriptorError::DecodeError(e.to_string()))?;

        Self::from_proto(&set)
    }

    /// Convert an already decoded descriptor set
    pub fn from_proto(set: &FileDescriptorSet) -> Result<Self, DescriptorError> {
        let files = set
            .file
            .iter()
            .map(convert_file)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(files = files.len(), "Decoded descriptor set");
        Ok(Self { files })
    }

    /// Unlinked file declarations, in descriptor order
    pub fn files(&self) -> &[FileDef] {
        &self.files
    }

    /// Link the declarations into a schema graph
    pub fn into_schema(self) -> Result<SchemaSet, DescriptorError> {
        Ok(SchemaSet::from_defs(self.files)?)
    }
}

/// Comments keyed by SourceCodeInfo path
struct CommentIndex(HashMap<Vec<i32>, Comments>);

impl CommentIndex {
    fn new(info: Option<&SourceCodeInfo>) -> Self {
        let mut map = HashMap::new();
        for location in info.map(|i| i.location.as_slice()).unwrap_or_default() {
            let comments = Comments {
                leading_detached: location.leading_detached_comments.clone(),
                leading: location.leading_comments.clone(),
                trailing: location.trailing_comments.clone(),
            };
            if !comments.is_empty() {
                map.insert(location.path.clone(), comments);
            }
        }
        Self(map)
    }

    fn at(&self, path: &[i32]) -> Comments {
        self.0.get(path).cloned().unwrap_or_default()
    }
}

fn child_path(parent: &[i32], field: i32, index: usize) -> Vec<i32> {
    let mut path = parent.to_vec();
    path.push(field);
    path.push(index as i32);
    path
}

fn convert_file(file: &FileDescriptorProto) -> Result<FileDef, DescriptorError> {
    if file.name().is_empty() {
        return Err(DescriptorError::InvalidDescriptor(
            "file descriptor without a name".to_string(),
        ));
    }

    let comments = CommentIndex::new(file.source_code_info.as_ref());
    let mut def = FileDef::new(file.name())
        .with_syntax(Syntax::from_descriptor(file.syntax()))
        .with_package(file.package());

    def.dependencies = file.dependency.clone();
    def.options = file.options.as_ref().map(convert_options).unwrap_or_default();
    def.comments = comments.at(&[]);
    def.syntax_comments = comments.at(&[FILE_SYNTAX]);
    def.package_comments = comments.at(&[FILE_PACKAGE]);

    for (i, message) in file.message_type.iter().enumerate() {
        let path = child_path(&[], FILE_MESSAGE, i);
        def.messages.push(convert_message(message, &path, &comments)?);
    }
    for (i, enum_type) in file.enum_type.iter().enumerate() {
        let path = child_path(&[], FILE_ENUM, i);
        def.enums.push(convert_enum(enum_type, &path, &comments));
    }
    for (i, service) in file.service.iter().enumerate() {
        let path = child_path(&[], FILE_SERVICE, i);
        def.services.push(convert_service(service, &path, &comments));
    }

    Ok(def)
}

fn convert_options(options: &FileOptions) -> Vec<FileOption> {
    let string = |v: &Option<String>| v.clone().map(OptionValue::String);
    let boolean = |v: Option<bool>| v.map(OptionValue::Bool);

    // field-number order
    let all = [
        ("java_package", string(&options.java_package)),
        ("java_outer_classname", string(&options.java_outer_classname)),
        (
            "optimize_for",
            options
                .optimize_for
                .map(|_| OptionValue::Ident(options.optimize_for().as_str_name().to_string())),
        ),
        ("java_multiple_files", boolean(options.java_multiple_files)),
        ("go_package", string(&options.go_package)),
        ("cc_generic_services", boolean(options.cc_generic_services)),
        ("java_generic_services", boolean(options.java_generic_services)),
        ("py_generic_services", boolean(options.py_generic_services)),
        ("java_generate_equals_and_hash", boolean(options.java_generate_equals_and_hash)),
        ("deprecated", boolean(options.deprecated)),
        ("java_string_check_utf8", boolean(options.java_string_check_utf8)),
        ("cc_enable_arenas", boolean(options.cc_enable_arenas)),
        ("objc_class_prefix", string(&options.objc_class_prefix)),
        ("csharp_namespace", string(&options.csharp_namespace)),
        ("swift_prefix", string(&options.swift_prefix)),
        ("php_class_prefix", string(&options.php_class_prefix)),
        ("php_namespace", string(&options.php_namespace)),
        ("php_generic_services", boolean(options.php_generic_services)),
        ("php_metadata_namespace", string(&options.php_metadata_namespace)),
        ("ruby_package", string(&options.ruby_package)),
    ];

    all.into_iter()
        .filter_map(|(name, value)| value.map(|value| FileOption::new(name, value)))
        .collect()
}

fn convert_message(
    message: &DescriptorProto,
    path: &[i32],
    comments: &CommentIndex,
) -> Result<MessageDef, DescriptorError> {
    let mut def = MessageDef::new(message.name()).with_comments(comments.at(path));
    def.map_entry = message
        .options
        .as_ref()
        .map(|o| o.map_entry())
        .unwrap_or(false);

    for (i, field) in message.field.iter().enumerate() {
        let field_path = child_path(path, MESSAGE_FIELD, i);
        def.fields.push(convert_field(field, message.name(), &field_path, comments)?);
    }
    for (i, nested) in message.nested_type.iter().enumerate() {
        let nested_path = child_path(path, MESSAGE_NESTED, i);
        def.messages.push(convert_message(nested, &nested_path, comments)?);
    }
    for (i, enum_type) in message.enum_type.iter().enumerate() {
        let enum_path = child_path(path, MESSAGE_ENUM, i);
        def.enums.push(convert_enum(enum_type, &enum_path, comments));
    }

    Ok(def)
}

fn convert_field(
    field: &FieldDescriptorProto,
    message: &str,
    path: &[i32],
    comments: &CommentIndex,
) -> Result<FieldDef, DescriptorError> {
    let type_ref = match field.r#type {
        Some(_) => match field.r#type() {
            Type::Message | Type::Group | Type::Enum => TypeRef::Named(field.type_name().to_string()),
            scalar => TypeRef::Scalar(scalar_type(scalar)),
        },
        // Unresolved descriptors may only carry the type name
        None if !field.type_name().is_empty() => TypeRef::Named(field.type_name().to_string()),
        None => {
            return Err(DescriptorError::InvalidDescriptor(format!(
                "field {}.{} has neither a type nor a type name",
                message,
                field.name()
            )))
        }
    };

    let label = match field.label() {
        ProtoLabel::Optional => Label::Optional,
        ProtoLabel::Required => Label::Required,
        ProtoLabel::Repeated => Label::Repeated,
    };

    Ok(FieldDef::new(field.name(), field.number(), type_ref)
        .with_label(label)
        .with_comments(comments.at(path)))
}

fn scalar_type(kind: Type) -> ScalarType {
    match kind {
        Type::Double => ScalarType::Double,
        Type::Float => ScalarType::Float,
        Type::Int64 => ScalarType::Int64,
        Type::Uint64 => ScalarType::Uint64,
        Type::Int32 => ScalarType::Int32,
        Type::Fixed64 => ScalarType::Fixed64,
        Type::Fixed32 => ScalarType::Fixed32,
        Type::Bool => ScalarType::Bool,
        Type::String => ScalarType::String,
        Type::Bytes => ScalarType::Bytes,
        Type::Uint32 => ScalarType::Uint32,
        Type::Sfixed32 => ScalarType::Sfixed32,
        Type::Sfixed64 => ScalarType::Sfixed64,
        Type::Sint32 => ScalarType::Sint32,
        Type::Sint64 => ScalarType::Sint64,
        // Named kinds are handled by the caller
        Type::Message | Type::Group | Type::Enum => ScalarType::Bytes,
    }
}

fn convert_enum(enum_type: &EnumDescriptorProto, path: &[i32], comments: &CommentIndex) -> EnumDef {
    let mut def = EnumDef::new(enum_type.name()).with_comments(comments.at(path));
    for (i, value) in enum_type.value.iter().enumerate() {
        def = def.with_value_def(EnumValueDef {
            name: value.name().to_string(),
            number: value.number(),
            comments: comments.at(&child_path(path, ENUM_VALUE, i)),
        });
    }
    def
}

fn convert_service(
    service: &ServiceDescriptorProto,
    path: &[i32],
    comments: &CommentIndex,
) -> ServiceDef {
    let mut def = ServiceDef::new(service.name()).with_comments(comments.at(path));
    for (i, method) in service.method.iter().enumerate() {
        def = def.with_method(
            MethodDef::new(method.name(), method.input_type(), method.output_type())
                .with_streaming(method.client_streaming(), method.server_streaming())
                .with_comments(comments.at(&child_path(path, SERVICE_METHOD, i))),
        );
    }
    def
}

/// Descriptor loading errors
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Can't read descriptor set {0}: {1}")]
    IoError(String, String),

    #[error("Descriptor set decoding failed: {0}")]
    DecodeError(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Schema linking failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Can't write {0}: {1}")]
    WriteError(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::source_code_info::Location;
    use prost_types::{
        EnumValueDescriptorProto, MessageOptions, MethodDescriptorProto,
    };
    use protofilter_core::schema::FieldType;

    fn field(name: &str, number: i32, kind: Type, type_name: Option<&str>) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(ProtoLabel::Optional as i32),
            r#type: Some(kind as i32),
            type_name: type_name.map(str::to_string),
            ..Default::default()
        }
    }

    fn sample_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test.proto".to_string()),
            package: Some("demo".to_string()),
            syntax: Some("proto3".to_string()),
            options: Some(FileOptions {
                go_package: Some("example.com/demo".to_string()),
                java_multiple_files: Some(true),
                ..Default::default()
            }),
            message_type: vec![
                DescriptorProto {
                    name: Some("msg_a".to_string()),
                    field: vec![
                        field("field_a_1", 1, Type::String, None),
                        field("field_a_2", 2, Type::Message, Some(".demo.msg_b")),
                    ],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("msg_b".to_string()),
                    field: vec![FieldDescriptorProto {
                        label: Some(ProtoLabel::Repeated as i32),
                        ..field("tags", 1, Type::Message, Some(".demo.msg_b.TagsEntry"))
                    }],
                    nested_type: vec![DescriptorProto {
                        name: Some("TagsEntry".to_string()),
                        field: vec![
                            field("key", 1, Type::String, None),
                            field("value", 2, Type::Enum, Some(".demo.Kind")),
                        ],
                        options: Some(MessageOptions {
                            map_entry: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".to_string()),
                value: vec![EnumValueDescriptorProto {
                    name: Some("KIND_UNSPECIFIED".to_string()),
                    number: Some(0),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("svc_a".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("Watch".to_string()),
                    input_type: Some(".demo.msg_a".to_string()),
                    output_type: Some(".demo.msg_b".to_string()),
                    server_streaming: Some(true),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            source_code_info: Some(SourceCodeInfo {
                location: vec![
                    Location {
                        path: vec![FILE_MESSAGE, 0],
                        leading_comments: Some(" The A message\n".to_string()),
                        ..Default::default()
                    },
                    Location {
                        path: vec![FILE_MESSAGE, 0, MESSAGE_FIELD, 1],
                        trailing_comments: Some(" points at b\n".to_string()),
                        ..Default::default()
                    },
                    Location {
                        path: vec![FILE_SYNTAX],
                        leading_detached_comments: vec![" Header\n".to_string()],
                        ..Default::default()
                    },
                ],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn convert_and_link() {
        let set = DescriptorSet::from_proto(&FileDescriptorSet {
            file: vec![sample_file()],
        })
        .unwrap();
        assert_eq!(set.files().len(), 1);

        let schema = set.into_schema().unwrap();
        let file = schema.file_by_name("test.proto").unwrap();
        let body = schema.element(file).as_file().unwrap();
        assert_eq!(body.syntax, Syntax::Proto3);
        assert_eq!(body.package, "demo");
        assert_eq!(body.options.len(), 2);
        assert_eq!(body.syntax_comments.leading_detached, vec![" Header\n".to_string()]);

        let field = schema.find("test.proto/msg_a/field_a_2").unwrap();
        let msg_b = schema.find("test.proto/msg_b").unwrap();
        assert_eq!(
            schema.element(field).as_field().unwrap().field_type,
            FieldType::Message(msg_b)
        );
        assert_eq!(
            schema.element(field).as_field().unwrap().comments.trailing.as_deref(),
            Some(" points at b\n")
        );

        let msg_a = schema.find("test.proto/msg_a").unwrap();
        assert_eq!(
            schema.element(msg_a).as_message().unwrap().comments.leading.as_deref(),
            Some(" The A message\n")
        );

        let entry = schema.find("test.proto/msg_b/TagsEntry").unwrap();
        assert!(schema.element(entry).is_map_entry());

        let method = schema.find("test.proto/svc_a/Watch").unwrap();
        let method = schema.element(method).as_method().unwrap();
        assert!(method.server_streaming);
        assert!(!method.client_streaming);
    }

    #[test]
    fn decode_from_bytes_and_file() {
        let set = FileDescriptorSet {
            file: vec![sample_file()],
        };
        let bytes = set.encode_to_vec();

        let decoded = DescriptorSet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.files()[0].name, "test.proto");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.pb");
        std::fs::write(&path, &bytes).unwrap();
        let loaded = DescriptorSet::from_file(&path).unwrap();
        assert_eq!(loaded.files().len(), 1);
    }

    #[test]
    fn reject_garbage_bytes() {
        let result = DescriptorSet::from_bytes(&[0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(DescriptorError::DecodeError(_))));
    }

    #[test]
    fn reject_unnamed_file() {
        let result = DescriptorSet::from_proto(&FileDescriptorSet {
            file: vec![FileDescriptorProto::default()],
        });
        assert!(matches!(result, Err(DescriptorError::InvalidDescriptor(_))));
    }

    #[test]
    fn unresolved_reference_fails_linking() {
        let mut file = sample_file();
        file.message_type[0].field[1].type_name = Some(".demo.missing".to_string());

        let set = DescriptorSet::from_proto(&FileDescriptorSet { file: vec![file] }).unwrap();
        assert!(matches!(
            set.into_schema(),
            Err(DescriptorError::Schema(SchemaError::UnresolvedType { .. }))
        ));
    }

    #[test]
    fn every_file_option_is_copied() {
        let options = FileOptions {
            java_package: Some("com.demo".to_string()),
            java_outer_classname: Some("DemoProto".to_string()),
            optimize_for: Some(prost_types::file_options::OptimizeMode::CodeSize as i32),
            java_multiple_files: Some(true),
            go_package: Some("example.com/demo".to_string()),
            cc_generic_services: Some(true),
            java_generic_services: Some(false),
            py_generic_services: Some(true),
            java_generate_equals_and_hash: Some(true),
            deprecated: Some(false),
            java_string_check_utf8: Some(true),
            cc_enable_arenas: Some(true),
            objc_class_prefix: Some("DM".to_string()),
            csharp_namespace: Some("Demo.Api".to_string()),
            swift_prefix: Some("Dm".to_string()),
            php_class_prefix: Some("Dm".to_string()),
            php_namespace: Some("Demo\\Api".to_string()),
            php_generic_services: Some(false),
            php_metadata_namespace: Some("Meta".to_string()),
            ruby_package: Some("Demo::Api".to_string()),
            ..Default::default()
        };

        let converted = convert_options(&options);
        assert_eq!(converted.len(), 20);
        assert!(converted.contains(&FileOption::new("cc_generic_services", OptionValue::Bool(true))));
        assert!(converted.contains(&FileOption::new(
            "php_metadata_namespace",
            OptionValue::String("Meta".to_string())
        )));
        assert!(converted.contains(&FileOption::new("java_string_check_utf8", OptionValue::Bool(true))));
        assert!(converted.contains(&FileOption::new(
            "optimize_for",
            OptionValue::Ident("CODE_SIZE".to_string())
        )));

        let partial = FileOptions {
            cc_generic_services: Some(true),
            php_metadata_namespace: Some("Meta".to_string()),
            java_string_check_utf8: Some(true),
            ..Default::default()
        };
        let names: Vec<_> = convert_options(&partial).into_iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            vec!["cc_generic_services", "java_string_check_utf8", "php_metadata_namespace"]
        );
    }
}
