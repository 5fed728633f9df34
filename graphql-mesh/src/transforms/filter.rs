use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use super::Transform;
use crate::configuration::FilterConfig;
use crate::error::TransformError;

const NAME: &str = "filter";

/// Removes fields, given as `Type.field`, from the raw schema of a source.
#[derive(Debug)]
pub struct FilterTransform {
    removed: Vec<(Name, Name)>,
}

impl FilterTransform {
    pub fn new(config: FilterConfig) -> Result<Self, TransformError> {
        let removed = config
            .remove
            .iter()
            .map(|coordinate| {
                let invalid = || TransformError::InvalidOption {
                    transform: NAME,
                    reason: format!("'{coordinate}' is not a Type.field coordinate"),
                };
                let (type_name, field_name) = coordinate.split_once('.').ok_or_else(invalid)?;
                Ok((
                    Name::new(type_name).map_err(|_| invalid())?,
                    Name::new(field_name).map_err(|_| invalid())?,
                ))
            })
            .collect::<Result<_, TransformError>>()?;
        Ok(Self { removed })
    }
}

impl Transform for FilterTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn no_wrap(&self) -> bool {
        true
    }

    fn transform_schema(&self, schema: Valid<Schema>) -> Result<Valid<Schema>, TransformError> {
        let mut schema = schema.into_inner();
        for (type_name, field_name) in &self.removed {
            let removed = match schema.types.get_mut(type_name) {
                Some(ExtendedType::Object(object)) => {
                    object.make_mut().fields.shift_remove(field_name).is_some()
                }
                Some(ExtendedType::Interface(interface)) => {
                    interface.make_mut().fields.shift_remove(field_name).is_some()
                }
                _ => false,
            };
            if !removed {
                tracing::warn!(%type_name, %field_name, "filtered field does not exist");
            }
        }
        schema
            .validate()
            .map_err(|with_errors| TransformError::InvalidSchema {
                transform: NAME,
                reason: with_errors.errors.to_string(),
            })
    }
}
