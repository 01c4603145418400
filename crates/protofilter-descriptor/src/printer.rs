//! `.proto` text output
//!
//! Renders the files of a [`SchemaSet`] back to protobuf source. Every
//! declaration inside a block is separated from the next one by a blank line,
//! and nesting is indented by two spaces.

use std::path::{Path, PathBuf};

use protofilter_core::schema::{
    package_scope, Comments, ElementId, FieldType, Label, SchemaSet, Syntax,
};

use crate::descriptor_set::DescriptorError;

const INDENT: &str = "  ";

/// Per-file printing context
struct FileContext {
    syntax: Syntax,
    scope: String,
}

/// Pretty-printer for a linked schema
pub struct ProtoPrinter<'a> {
    schema: &'a SchemaSet,
}

impl<'a> ProtoPrinter<'a> {
    pub fn new(schema: &'a SchemaSet) -> Self {
        Self { schema }
    }

    /// Render one file as `.proto` text
    pub fn print_file(&self, file: ElementId) -> String {
        let Some(body) = self.schema.element(file).as_file() else {
            return String::new();
        };
        let ctx = FileContext {
            syntax: body.syntax,
            scope: package_scope(&body.package),
        };

        let mut sections: Vec<Vec<String>> = Vec::new();

        let mut header = Vec::new();
        push_comments(&mut header, 0, &body.comments);
        push_comments(&mut header, 0, &body.syntax_comments);
        push_decl(
            &mut header,
            0,
            format!("syntax = \"{}\";", body.syntax.as_str()),
            &body.syntax_comments,
        );
        sections.push(header);

        if !body.package.is_empty() {
            let mut package = Vec::new();
            push_comments(&mut package, 0, &body.package_comments);
            push_decl(
                &mut package,
                0,
                format!("package {};", body.package),
                &body.package_comments,
            );
            sections.push(package);
        }

        if !body.dependencies.is_empty() {
            sections.push(
                body.dependencies
                    .iter()
                    .map(|dep| format!("import \"{}\";", dep))
                    .collect(),
            );
        }

        if !body.options.is_empty() {
            sections.push(
                body.options
                    .iter()
                    .map(|opt| format!("option {} = {};", opt.name, opt.value))
                    .collect(),
            );
        }

        for &message in &body.messages {
            sections.push(self.message_lines(message, 0, &ctx));
        }
        for &enum_id in &body.enums {
            sections.push(self.enum_lines(enum_id, 0));
        }
        for &service in &body.services {
            sections.push(self.service_lines(service, 0, &ctx));
        }

        let mut text = sections
            .iter()
            .map(|section| section.join("\n"))
            .collect::<Vec<_>>()
            .join("\n\n");
        text.push('\n');
        text
    }

    /// Render every file, paired with its name
    pub fn print_all(&self) -> Vec<(String, String)> {
        self.schema
            .files()
            .iter()
            .map(|&file| (self.schema.name(file).to_string(), self.print_file(file)))
            .collect()
    }

    /// Write every file below `dir`, creating subdirectories as file names require
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, DescriptorError> {
        let mut written = Vec::new();
        for (name, text) in self.print_all() {
            let path = dir.join(&name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DescriptorError::WriteError(parent.display().to_string(), e.to_string())
                })?;
            }
            std::fs::write(&path, text)
                .map_err(|e| DescriptorError::WriteError(path.display().to_string(), e.to_string()))?;

            tracing::debug!(file = %path.display(), "Wrote proto file");
            written.push(path);
        }
        Ok(written)
    }

    fn message_lines(&self, id: ElementId, indent: usize, ctx: &FileContext) -> Vec<String> {
        let element = self.schema.element(id);
        let Some(body) = element.as_message() else {
            return Vec::new();
        };

        let mut children = Vec::new();
        for &nested in &body.messages {
            // entries are printed through their map<K, V> field
            if !self.schema.element(nested).is_map_entry() {
                children.push(self.message_lines(nested, indent + 1, ctx));
            }
        }
        for &enum_id in &body.enums {
            children.push(self.enum_lines(enum_id, indent + 1));
        }
        for &field in &body.fields {
            children.push(self.field_lines(field, indent + 1, ctx));
        }

        let mut lines = Vec::new();
        push_comments(&mut lines, indent, &body.comments);
        push_decl(&mut lines, indent, format!("message {} {{", element.name), &body.comments);
        push_children(&mut lines, children);
        lines.push(format!("{}}}", pad(indent)));
        lines
    }

    fn field_lines(&self, id: ElementId, indent: usize, ctx: &FileContext) -> Vec<String> {
        let element = self.schema.element(id);
        let Some(body) = element.as_field() else {
            return Vec::new();
        };

        let decl = match self.schema.map_entry_types(id) {
            Some((key, value)) => format!(
                "map<{}, {}> {} = {};",
                self.type_name(&key, ctx),
                self.type_name(&value, ctx),
                element.name,
                body.number
            ),
            None => {
                let label = match (body.label, ctx.syntax) {
                    (Label::Repeated, _) => "repeated ",
                    (Label::Required, _) => "required ",
                    (Label::Optional, Syntax::Proto2) => "optional ",
                    (Label::Optional, Syntax::Proto3) => "",
                };
                format!(
                    "{}{} {} = {};",
                    label,
                    self.type_name(&body.field_type, ctx),
                    element.name,
                    body.number
                )
            }
        };

        let mut lines = Vec::new();
        push_comments(&mut lines, indent, &body.comments);
        push_decl(&mut lines, indent, decl, &body.comments);
        lines
    }

    fn enum_lines(&self, id: ElementId, indent: usize) -> Vec<String> {
        let element = self.schema.element(id);
        let Some(body) = element.as_enum() else {
            return Vec::new();
        };

        let mut children = Vec::new();
        for &value in &body.values {
            let value_element = self.schema.element(value);
            if let Some(value_body) = value_element.as_enum_value() {
                let mut lines = Vec::new();
                push_comments(&mut lines, indent + 1, &value_body.comments);
                push_decl(
                    &mut lines,
                    indent + 1,
                    format!("{} = {};", value_element.name, value_body.number),
                    &value_body.comments,
                );
                children.push(lines);
            }
        }

        let mut lines = Vec::new();
        push_comments(&mut lines, indent, &body.comments);
        push_decl(&mut lines, indent, format!("enum {} {{", element.name), &body.comments);
        push_children(&mut lines, children);
        lines.push(format!("{}}}", pad(indent)));
        lines
    }

    fn service_lines(&self, id: ElementId, indent: usize, ctx: &FileContext) -> Vec<String> {
        let element = self.schema.element(id);
        let Some(body) = element.as_service() else {
            return Vec::new();
        };

        let mut children = Vec::new();
        for &method in &body.methods {
            let method_element = self.schema.element(method);
            let Some(method_body) = method_element.as_method() else {
                continue;
            };
            let decl = format!(
                "rpc {} ( {}{} ) returns ( {}{} );",
                method_element.name,
                if method_body.client_streaming { "stream " } else { "" },
                self.message_name(method_body.input, ctx),
                if method_body.server_streaming { "stream " } else { "" },
                self.message_name(method_body.output, ctx),
            );
            let mut lines = Vec::new();
            push_comments(&mut lines, indent + 1, &method_body.comments);
            push_decl(&mut lines, indent + 1, decl, &method_body.comments);
            children.push(lines);
        }

        let mut lines = Vec::new();
        push_comments(&mut lines, indent, &body.comments);
        push_decl(&mut lines, indent, format!("service {} {{", element.name), &body.comments);
        push_children(&mut lines, children);
        lines.push(format!("{}}}", pad(indent)));
        lines
    }

    fn type_name(&self, field_type: &FieldType, ctx: &FileContext) -> String {
        match field_type {
            FieldType::Scalar(scalar) => scalar.as_str().to_string(),
            FieldType::Message(id) | FieldType::Enum(id) => self.message_name(*id, ctx),
        }
    }

    /// Type name relative to the printed file's package where possible
    fn message_name(&self, id: ElementId, ctx: &FileContext) -> String {
        let full = self.schema.full_name(id);
        if ctx.scope.is_empty() {
            return full.trim_start_matches('.').to_string();
        }
        match full.strip_prefix(&ctx.scope).and_then(|rest| rest.strip_prefix('.')) {
            Some(relative) => relative.to_string(),
            None => full,
        }
    }
}

fn pad(indent: usize) -> String {
    INDENT.repeat(indent)
}

fn comment_lines(out: &mut Vec<String>, indent: usize, text: &str) {
    let text = text.strip_suffix('\n').unwrap_or(text);
    for line in text.split('\n') {
        out.push(format!("{}//{}", pad(indent), line));
    }
}

/// Detached and leading comments, placed above a declaration
fn push_comments(out: &mut Vec<String>, indent: usize, comments: &Comments) {
    for detached in &comments.leading_detached {
        comment_lines(out, indent, detached);
        out.push(String::new());
    }
    if let Some(leading) = &comments.leading {
        comment_lines(out, indent, leading);
    }
}

/// Declaration line followed by its trailing comment
fn push_decl(out: &mut Vec<String>, indent: usize, decl: String, comments: &Comments) {
    let trailing = comments
        .trailing
        .as_deref()
        .map(|t| t.strip_suffix('\n').unwrap_or(t));

    match trailing {
        Some(t) if !t.contains('\n') => out.push(format!("{}{} //{}", pad(indent), decl, t)),
        Some(t) => {
            out.push(format!("{}{}", pad(indent), decl));
            comment_lines(out, indent, t);
        }
        None => out.push(format!("{}{}", pad(indent), decl)),
    }
}

fn push_children(out: &mut Vec<String>, children: Vec<Vec<String>>) {
    for (i, child) in children.into_iter().enumerate() {
        if i > 0 {
            out.push(String::new());
        }
        out.extend(child);
    }
}
