use std::collections::HashMap;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexSet;

use crate::engine::values::should_include;
use crate::json_ext::Object;

const TYPENAME: Name = name!("__typename");

/// Fields that must be fetched whenever a type is selected from a source, whatever the
/// caller asked for.
#[derive(Debug, Default, Clone)]
pub(crate) struct Requirements {
    by_type: HashMap<Name, Vec<ast::Selection>>,
}

impl Requirements {
    /// Adds a field set such as `{ authorId }` or `id name` for `type_name`.
    pub(crate) fn add(&mut self, type_name: Name, field_set: &str) -> Result<(), String> {
        let selections = parse_field_set(field_set)?;
        self.by_type.entry(type_name).or_default().extend(selections);
        Ok(())
    }

    pub(crate) fn get(&self, type_name: &Name) -> &[ast::Selection] {
        self.by_type
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub(crate) fn parse_field_set(field_set: &str) -> Result<Vec<ast::Selection>, String> {
    let source = format!("{{ {} }}", strip_braces(field_set));
    let document = ast::Document::parse(source, "requirements.graphql")
        .map_err(|with_errors| format!("invalid field set '{field_set}': {}", with_errors.errors))?;
    match document.definitions.first() {
        Some(ast::Definition::OperationDefinition(operation)) if !operation.selection_set.is_empty() => {
            Ok(operation.selection_set.clone())
        }
        _ => Err(format!("invalid field set '{field_set}': no field selected")),
    }
}

/// `{ a b }` and `a b` select the same fields.
pub(crate) fn strip_braces(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

/// Rewrites caller selections into the selections sent to one source view.
///
/// Fields the view lacks are dropped, `@skip`/`@include` are evaluated with the caller's
/// variables and every composite selection gets a `__typename` and the requirements of
/// its type.
pub(crate) struct SelectionBuilder<'a> {
    view: &'a Schema,
    variables: &'a Object,
    requirements: &'a Requirements,
    used_variables: IndexSet<Name>,
}

impl<'a> SelectionBuilder<'a> {
    pub(crate) fn new(view: &'a Schema, variables: &'a Object, requirements: &'a Requirements) -> Self {
        Self {
            view,
            variables,
            requirements,
            used_variables: IndexSet::new(),
        }
    }

    /// Variables referenced by the arguments kept so far.
    pub(crate) fn used_variables(&self) -> &IndexSet<Name> {
        &self.used_variables
    }

    /// The selection for a value of composite type `parent`.
    pub(crate) fn build(
        &mut self,
        parent: &Name,
        selection_sets: &[&[ast::Selection]],
    ) -> Vec<ast::Selection> {
        let mut selections = vec![typename_selection()];
        for selection_set in selection_sets {
            self.build_into(parent, selection_set, &mut selections);
        }
        self.add_requirements(parent, &mut selections);
        selections
    }

    /// Like [`SelectionBuilder::build`], with the given fields themselves selected on `parent`.
    pub(crate) fn build_fields(
        &mut self,
        parent: &Name,
        fields: &[&ast::Field],
    ) -> Vec<ast::Selection> {
        let mut selections = vec![typename_selection()];
        for field in fields {
            if let Some(selection) = self.field(parent, field) {
                selections.push(selection);
            }
        }
        self.add_requirements(parent, &mut selections);
        selections
    }

    fn build_into(&mut self, parent: &Name, selections: &[ast::Selection], out: &mut Vec<ast::Selection>) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if let Some(selection) = self.field(parent, field) {
                        out.push(selection);
                    }
                }
                ast::Selection::InlineFragment(inline) => {
                    if !should_include(&inline.directives, self.variables) {
                        continue;
                    }
                    let condition = inline.type_condition.clone();
                    let target = condition.clone().unwrap_or_else(|| parent.clone());
                    if !self.fragment_applies(parent, &target) {
                        continue;
                    }
                    let selection_set = self.build(&target, &[inline.selection_set.as_slice()]);
                    out.push(inline_fragment(condition, selection_set));
                }
                // Callers inline named fragments before building.
                ast::Selection::FragmentSpread(_) => {}
            }
        }
    }

    fn field(&mut self, parent: &Name, field: &ast::Field) -> Option<ast::Selection> {
        if !should_include(&field.directives, self.variables) {
            return None;
        }
        if field.name == TYPENAME {
            return Some(ast::Selection::Field(Node::new(ast::Field {
                alias: field.alias.clone(),
                name: TYPENAME,
                arguments: Vec::new(),
                directives: Default::default(),
                selection_set: Vec::new(),
            })));
        }
        let definition = self.view.type_field(parent, &field.name).ok()?;
        for argument in &field.arguments {
            collect_variables(&argument.value, &mut self.used_variables);
        }
        let return_type = definition.ty.inner_named_type();
        let selection_set = if is_composite(self.view, return_type) {
            self.build(return_type, &[field.selection_set.as_slice()])
        } else {
            Vec::new()
        };
        Some(ast::Selection::Field(Node::new(ast::Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            directives: Default::default(),
            selection_set,
        })))
    }

    fn add_requirements(&self, parent: &Name, out: &mut Vec<ast::Selection>) {
        for required in self.requirements.get(parent) {
            let present = match required {
                ast::Selection::Field(field) => self.view.type_field(parent, &field.name).is_ok(),
                _ => true,
            };
            if present {
                out.push(required.clone());
            }
        }
    }

    /// An inline fragment on `condition` can match values selected as `parent`.
    fn fragment_applies(&self, parent: &Name, condition: &Name) -> bool {
        if !self.view.types.contains_key(condition) {
            return false;
        }
        type_applies(self.view, parent, condition)
            || type_applies(self.view, condition, parent)
            || (is_abstract(self.view, parent) && is_abstract(self.view, condition))
    }
}

pub(crate) fn is_composite(schema: &Schema, type_name: &Name) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

/// Whether values of `object_type` match a fragment on `condition`.
fn type_applies(schema: &Schema, object_type: &Name, condition: &Name) -> bool {
    if object_type == condition {
        return true;
    }
    match schema.types.get(condition) {
        Some(ExtendedType::Interface(_)) => match schema.types.get(object_type) {
            Some(ExtendedType::Object(object)) => object.implements_interfaces.contains(condition),
            Some(ExtendedType::Interface(interface)) => interface.implements_interfaces.contains(condition),
            _ => false,
        },
        Some(ExtendedType::Union(union_type)) => union_type.members.contains(object_type),
        _ => false,
    }
}

fn is_abstract(schema: &Schema, type_name: &Name) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

fn typename_selection() -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias: None,
        name: TYPENAME,
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set: Vec::new(),
    }))
}

fn inline_fragment(condition: Option<Name>, selection_set: Vec<ast::Selection>) -> ast::Selection {
    ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
        type_condition: condition,
        directives: Default::default(),
        selection_set,
    }))
}

fn collect_variables(value: &ast::Value, used: &mut IndexSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            used.insert(name.clone());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_variables(item, used);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_variables(value, used);
            }
        }
        _ => {}
    }
}
