//! Conversions between the engine's documents and values and the `apollo-compiler` AST.

use std::collections::HashMap;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use async_graphql_parser::Positioned;
use async_graphql_parser::types as gql;
use async_graphql_value::ConstValue;

use crate::json_ext::Object;
use crate::json_ext::Value;

pub(crate) type Fragments = HashMap<async_graphql_value::Name, Positioned<gql::FragmentDefinition>>;

/// Converts a GraphQL literal into JSON, substituting variables.
pub(crate) fn ast_value_to_json(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::from(name.as_str()),
        ast::Value::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        ast::Value::String(s) => Value::from(s.as_str()),
        ast::Value::Float(f) => f
            .try_to_f64()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ast::Value::Int(i) => match i.as_str().parse::<i64>() {
            Ok(int) => Value::from(int),
            Err(_) => i
                .as_str()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| ast_value_to_json(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.as_str().into(), ast_value_to_json(value, variables)))
                .collect(),
        ),
    }
}

/// Default values of input positions, enums kept as enums.
pub(crate) fn ast_value_to_const(value: &ast::Value) -> ConstValue {
    match value {
        ast::Value::Enum(name) => ConstValue::Enum(async_graphql_value::Name::new(name.as_str())),
        ast::Value::List(items) => {
            ConstValue::List(items.iter().map(|item| ast_value_to_const(item)).collect())
        }
        ast::Value::Object(fields) => ConstValue::Object(
            fields
                .iter()
                .map(|(name, value)| {
                    (
                        async_graphql_value::Name::new(name.as_str()),
                        ast_value_to_const(value),
                    )
                })
                .collect(),
        ),
        literal => json_to_const(&ast_value_to_json(literal, &Object::new())),
    }
}

pub(crate) fn json_to_const(value: &Value) -> ConstValue {
    match value {
        Value::Null => ConstValue::Null,
        Value::Bool(b) => ConstValue::Boolean(*b),
        Value::Number(n) => ConstValue::Number(n.clone()),
        Value::String(s) => ConstValue::String(s.as_str().to_string()),
        Value::Array(items) => ConstValue::List(items.iter().map(json_to_const).collect()),
        Value::Object(object) => ConstValue::Object(
            object
                .iter()
                .map(|(key, value)| (async_graphql_value::Name::new(key.as_str()), json_to_const(value)))
                .collect(),
        ),
    }
}

pub(crate) fn const_to_json(value: &ConstValue) -> Value {
    match value {
        ConstValue::Null => Value::Null,
        ConstValue::Boolean(b) => Value::Bool(*b),
        ConstValue::Number(n) => Value::Number(n.clone()),
        ConstValue::String(s) => Value::from(s.as_str()),
        ConstValue::Enum(name) => Value::from(name.as_str()),
        ConstValue::Binary(bytes) => Value::from(String::from_utf8_lossy(bytes).as_ref()),
        ConstValue::List(items) => Value::Array(items.iter().map(const_to_json).collect()),
        ConstValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.as_str().into(), const_to_json(value)))
                .collect(),
        ),
    }
}

/// Evaluates `@skip` and `@include`.
pub(crate) fn should_include(directives: &ast::DirectiveList, variables: &Object) -> bool {
    let condition = |directive_name: &str| {
        directives.get(directive_name).map(|directive| {
            directive
                .arguments
                .iter()
                .find(|argument| argument.name == "if")
                .map(|argument| ast_value_to_json(&argument.value, variables))
                == Some(Value::Bool(true))
        })
    };
    condition("skip") != Some(true) && condition("include") != Some(false)
}

/// Rewrites an engine field node as `apollo-compiler` AST.
///
/// Fragment spreads become inline fragments on the fragment's type condition, keeping
/// the spread's directives.
pub(crate) fn field_to_ast(field: &gql::Field, fragments: &Fragments) -> ast::Field {
    ast::Field {
        alias: field.alias.as_ref().map(|alias| name(&alias.node)),
        name: name(&field.name.node),
        arguments: field
            .arguments
            .iter()
            .map(|(arg_name, value)| {
                Node::new(ast::Argument {
                    name: name(&arg_name.node),
                    value: Node::new(value_to_ast(&value.node)),
                })
            })
            .collect(),
        directives: directives_to_ast(&field.directives),
        selection_set: selection_set_to_ast(&field.selection_set.node, fragments),
    }
}

fn selection_set_to_ast(selection_set: &gql::SelectionSet, fragments: &Fragments) -> Vec<ast::Selection> {
    selection_set
        .items
        .iter()
        .filter_map(|selection| match &selection.node {
            gql::Selection::Field(field) => {
                Some(ast::Selection::Field(Node::new(field_to_ast(&field.node, fragments))))
            }
            gql::Selection::InlineFragment(inline) => {
                Some(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                    type_condition: inline
                        .node
                        .type_condition
                        .as_ref()
                        .map(|condition| name(&condition.node.on.node)),
                    directives: directives_to_ast(&inline.node.directives),
                    selection_set: selection_set_to_ast(&inline.node.selection_set.node, fragments),
                })))
            }
            gql::Selection::FragmentSpread(spread) => {
                let fragment = fragments.get(&spread.node.fragment_name.node)?;
                Some(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                    type_condition: Some(name(&fragment.node.type_condition.node.on.node)),
                    directives: directives_to_ast(&spread.node.directives),
                    selection_set: selection_set_to_ast(&fragment.node.selection_set.node, fragments),
                })))
            }
        })
        .collect()
}

fn directives_to_ast(directives: &[Positioned<gql::Directive>]) -> ast::DirectiveList {
    ast::DirectiveList(
        directives
            .iter()
            .map(|directive| {
                Node::new(ast::Directive {
                    name: name(&directive.node.name.node),
                    arguments: directive
                        .node
                        .arguments
                        .iter()
                        .map(|(arg_name, value)| {
                            Node::new(ast::Argument {
                                name: name(&arg_name.node),
                                value: Node::new(value_to_ast(&value.node)),
                            })
                        })
                        .collect(),
                })
            })
            .collect(),
    )
}

fn value_to_ast(value: &async_graphql_value::Value) -> ast::Value {
    use async_graphql_value::Value as Literal;
    match value {
        Literal::Variable(variable) => ast::Value::Variable(name(variable)),
        Literal::Null => ast::Value::Null,
        Literal::Number(number) if number.is_f64() => {
            ast::Value::Float(ast::FloatValue::new_parsed(&number.to_string()))
        }
        Literal::Number(number) => ast::Value::Int(ast::IntValue::new_parsed(&number.to_string())),
        Literal::String(s) => ast::Value::String(s.clone()),
        Literal::Boolean(b) => ast::Value::Boolean(*b),
        Literal::Binary(bytes) => ast::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        Literal::Enum(variant) => ast::Value::Enum(name(variant)),
        Literal::List(items) => {
            ast::Value::List(items.iter().map(|item| Node::new(value_to_ast(item))).collect())
        }
        Literal::Object(fields) => ast::Value::Object(
            fields
                .iter()
                .map(|(field, value)| (name(field), Node::new(value_to_ast(value))))
                .collect(),
        ),
    }
}

// Names in a parsed document are already valid GraphQL names.
fn name(name: &async_graphql_value::Name) -> Name {
    Name::new_unchecked(name.as_str())
}
