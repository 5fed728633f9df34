use std::collections::HashMap;

use apollo_compiler::Name;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::ast::Type;

use crate::json_ext::Value;

/// Type and root field renames between a source schema and its transformed view.
#[derive(Debug, Clone, Default)]
pub(crate) struct Renames {
    /// original type name -> new type name
    pub(crate) types: HashMap<Name, Name>,
    /// root type name -> original field name -> new field name
    pub(crate) root_fields: HashMap<Name, HashMap<Name, Name>>,
    pub(crate) roots: Vec<(OperationType, Name)>,
}

impl Renames {
    pub(crate) fn reversed(&self) -> Renames {
        Renames {
            types: self
                .types
                .iter()
                .map(|(from, to)| (to.clone(), from.clone()))
                .collect(),
            root_fields: self
                .root_fields
                .iter()
                .map(|(root, fields)| {
                    let fields = fields
                        .iter()
                        .map(|(from, to)| (to.clone(), from.clone()))
                        .collect();
                    (self.types.get(root).unwrap_or(root).clone(), fields)
                })
                .collect(),
            roots: self
                .roots
                .iter()
                .map(|(operation, root)| {
                    (*operation, self.types.get(root).unwrap_or(root).clone())
                })
                .collect(),
        }
    }

    fn root_for(&self, operation: OperationType) -> Option<&Name> {
        self.roots
            .iter()
            .find(|(candidate, _)| *candidate == operation)
            .map(|(_, root)| root)
    }

    fn rename(&self, name: &mut Name) {
        if let Some(renamed) = self.types.get(name) {
            *name = renamed.clone();
        }
    }

    fn rename_type(&self, ty: &mut Type) {
        match ty {
            Type::Named(name) | Type::NonNullNamed(name) => self.rename(name),
            Type::List(inner) | Type::NonNullList(inner) => self.rename_type(inner),
        }
    }

    fn rename_field_definitions(
        &self,
        type_name: &Name,
        fields: &mut [apollo_compiler::Node<ast::FieldDefinition>],
    ) {
        let root_fields = self.root_fields.get(type_name);
        for field in fields {
            let field = field.make_mut();
            if let Some(renamed) = root_fields.and_then(|renames| renames.get(&field.name)) {
                field.name = renamed.clone();
            }
            self.rename_type(&mut field.ty);
            self.rename_input_values(&mut field.arguments);
        }
    }

    fn rename_input_values(&self, values: &mut [apollo_compiler::Node<ast::InputValueDefinition>]) {
        for value in values {
            let value = value.make_mut();
            self.rename_type(value.ty.make_mut());
        }
    }

    /// Renames type definitions, references and root fields of a schema document.
    pub(crate) fn apply_to_schema(&self, document: &mut ast::Document) {
        for definition in &mut document.definitions {
            match definition {
                ast::Definition::ObjectTypeDefinition(node) => {
                    let object = node.make_mut();
                    let original = object.name.clone();
                    self.rename(&mut object.name);
                    object
                        .implements_interfaces
                        .iter_mut()
                        .for_each(|interface| self.rename(interface));
                    self.rename_field_definitions(&original, &mut object.fields);
                }
                ast::Definition::ObjectTypeExtension(node) => {
                    let object = node.make_mut();
                    let original = object.name.clone();
                    self.rename(&mut object.name);
                    object
                        .implements_interfaces
                        .iter_mut()
                        .for_each(|interface| self.rename(interface));
                    self.rename_field_definitions(&original, &mut object.fields);
                }
                ast::Definition::InterfaceTypeDefinition(node) => {
                    let interface = node.make_mut();
                    let original = interface.name.clone();
                    self.rename(&mut interface.name);
                    interface
                        .implements_interfaces
                        .iter_mut()
                        .for_each(|parent| self.rename(parent));
                    self.rename_field_definitions(&original, &mut interface.fields);
                }
                ast::Definition::UnionTypeDefinition(node) => {
                    let union_type = node.make_mut();
                    self.rename(&mut union_type.name);
                    union_type
                        .members
                        .iter_mut()
                        .for_each(|member| self.rename(member));
                }
                ast::Definition::EnumTypeDefinition(node) => self.rename(&mut node.make_mut().name),
                ast::Definition::ScalarTypeDefinition(node) => {
                    self.rename(&mut node.make_mut().name)
                }
                ast::Definition::InputObjectTypeDefinition(node) => {
                    let input = node.make_mut();
                    self.rename(&mut input.name);
                    self.rename_input_values(&mut input.fields);
                }
                ast::Definition::SchemaDefinition(node) => {
                    for root in &mut node.make_mut().root_operations {
                        self.rename(&mut root.make_mut().1);
                    }
                }
                ast::Definition::DirectiveDefinition(node) => {
                    self.rename_input_values(&mut node.make_mut().arguments);
                }
                _ => {}
            }
        }
    }

    /// Renames type conditions, variable types and root fields of an operation document.
    ///
    /// Renamed root fields keep their response key through an alias.
    pub(crate) fn apply_to_operation(&self, document: &mut ast::Document) {
        for definition in &mut document.definitions {
            match definition {
                ast::Definition::OperationDefinition(node) => {
                    let operation = node.make_mut();
                    for variable in &mut operation.variables {
                        self.rename_type(variable.make_mut().ty.make_mut());
                    }
                    let root_fields = self
                        .root_for(operation.operation_type)
                        .and_then(|root| self.root_fields.get(root));
                    if let Some(root_fields) = root_fields {
                        rename_root_fields(&mut operation.selection_set, root_fields);
                    }
                    self.rename_selections(&mut operation.selection_set);
                }
                ast::Definition::FragmentDefinition(node) => {
                    let fragment = node.make_mut();
                    self.rename(&mut fragment.type_condition);
                    self.rename_selections(&mut fragment.selection_set);
                }
                _ => {}
            }
        }
    }

    fn rename_selections(&self, selections: &mut [ast::Selection]) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    self.rename_selections(&mut field.make_mut().selection_set)
                }
                ast::Selection::InlineFragment(inline) => {
                    let inline = inline.make_mut();
                    if let Some(condition) = &mut inline.type_condition {
                        self.rename(condition);
                    }
                    self.rename_selections(&mut inline.selection_set);
                }
                ast::Selection::FragmentSpread(_) => {}
            }
        }
    }

    /// Renames every `__typename` value found in response data.
    pub(crate) fn apply_to_data(&self, value: &mut Value) {
        match value {
            Value::Object(object) => {
                for (key, child) in object.iter_mut() {
                    if key.as_str() == "__typename" {
                        let renamed = child
                            .as_str()
                            .and_then(|name| Name::new(name).ok())
                            .and_then(|name| self.types.get(&name));
                        if let Some(renamed) = renamed {
                            *child = Value::from(renamed.as_str());
                        }
                    } else {
                        self.apply_to_data(child);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.apply_to_data(item)),
            _ => {}
        }
    }
}

fn rename_root_fields(selections: &mut [ast::Selection], renames: &HashMap<Name, Name>) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                if let Some(renamed) = renames.get(&field.name) {
                    let field = field.make_mut();
                    if field.alias.is_none() {
                        field.alias = Some(field.name.clone());
                    }
                    field.name = renamed.clone();
                }
            }
            ast::Selection::InlineFragment(inline) => {
                rename_root_fields(&mut inline.make_mut().selection_set, renames)
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
}
