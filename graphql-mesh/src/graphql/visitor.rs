use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// Walks response data alongside the operation that produced it.
pub(crate) trait ResponseVisitor {
    /// Called for every object found in the response, with the type it was selected as.
    fn visit_object(&mut self, _ty: &Name, _object: &Object) {}

    fn visit_field(
        &mut self,
        request: &ExecutableDocument,
        _parent_type: &Name,
        field: &Field,
        value: &Value,
    ) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.visit_list_item(request, field, item);
                }
            }
            Value::Object(children) => {
                self.visit_object(field.ty().inner_named_type(), children);
                self.visit_selections(request, &field.selection_set, children);
            }
            _ => {}
        }
    }

    fn visit_list_item(&mut self, request: &ExecutableDocument, field: &Field, value: &Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.visit_list_item(request, field, item);
                }
            }
            Value::Object(children) => {
                self.visit_object(field.ty().inner_named_type(), children);
                self.visit_selections(request, &field.selection_set, children);
            }
            _ => {}
        }
    }

    fn visit(&mut self, request: &ExecutableDocument, operation: &Operation, data: &Value) {
        if let Value::Object(children) = data {
            self.visit_selections(request, &operation.selection_set, children);
        }
    }

    fn visit_selections(
        &mut self,
        request: &ExecutableDocument,
        selection_set: &SelectionSet,
        fields: &Object,
    ) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(inner_field) => {
                    if let Some(value) = fields.get(inner_field.response_key().as_str()) {
                        self.visit_field(request, &selection_set.ty, inner_field.as_ref(), value);
                    }
                }
                Selection::FragmentSpread(fragment_spread) => {
                    if let Some(fragment) = fragment_spread.fragment_def(request) {
                        self.visit_selections(request, &fragment.selection_set, fields);
                    } else {
                        tracing::warn!(
                            "The fragment {} was not found in the query document.",
                            fragment_spread.fragment_name
                        );
                    }
                }
                Selection::InlineFragment(inline_fragment) => {
                    self.visit_selections(request, &inline_fragment.selection_set, fields);
                }
            }
        }
    }
}
