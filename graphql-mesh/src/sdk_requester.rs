//! Typed access to a mesh: run an operation, get its data or one error.

use async_trait::async_trait;

use crate::error::SdkError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::live_query::ExecutionResult;
use crate::mesh::Mesh;
use crate::mesh::MeshRequest;
use crate::mesh::Operation;

/// Runs operations for an [`SdkRequester`].
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute_operation(&self, request: MeshRequest) -> ExecutionResult;
}

#[async_trait]
impl OperationExecutor for Mesh {
    async fn execute_operation(&self, request: MeshRequest) -> ExecutionResult {
        self.execute(request).await
    }
}

/// Turns responses into `Result`s. Live queries yield their initial result.
#[derive(Clone, Debug)]
pub struct SdkRequester<E> {
    executor: E,
}

impl<E: OperationExecutor> SdkRequester<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn request(
        &self,
        operation: impl Into<Operation>,
        variables: Object,
    ) -> Result<Value, SdkError> {
        self.request_with(
            MeshRequest::builder()
                .operation(operation)
                .variables(variables)
                .build(),
        )
        .await
    }

    /// Any error in the response fails the whole request, partial data included.
    pub async fn request_with(&self, request: MeshRequest) -> Result<Value, SdkError> {
        let query = request.operation.to_string();
        let variables = request.variables.clone();
        let Some(response) = self
            .executor
            .execute_operation(request)
            .await
            .into_response()
            .await
        else {
            return Err(SdkError::MalformedResult);
        };

        if !response.errors.is_empty() {
            tracing::error!(
                %query,
                variables = %serde_json::to_string(&variables).unwrap_or_default(),
                errors = ?response.errors,
                "sdk request failed"
            );
            return Err(SdkError::Aggregate {
                errors: response.errors,
                query,
                variables,
                data: response.data,
            });
        }
        response.data.ok_or(SdkError::MalformedResult)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql;
    use crate::graphql::Response;

    struct Canned(Mutex<Vec<Response>>);

    #[async_trait]
    impl OperationExecutor for Canned {
        async fn execute_operation(&self, _request: MeshRequest) -> ExecutionResult {
            ExecutionResult::Single(self.0.lock().remove(0))
        }
    }

    fn requester(responses: Vec<Response>) -> SdkRequester<Canned> {
        SdkRequester::new(Canned(Mutex::new(responses)))
    }

    #[tokio::test]
    async fn data_without_errors_is_returned() {
        let sdk = requester(vec![Response::builder().data(json!({"a": 1})).build()]);
        assert_eq!(sdk.request("{ a }", Object::new()).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn errors_fail_the_request_even_with_data() {
        let sdk = requester(vec![
            Response::builder()
                .data(json!({"a": null}))
                .error(graphql::Error::builder().message("boom").build())
                .build(),
        ]);
        let mut variables = Object::new();
        variables.insert("id", json!(1));
        let error = sdk.request("{ a }", variables.clone()).await.unwrap_err();
        let SdkError::Aggregate {
            errors,
            query,
            variables: sent,
            data,
        } = error
        else {
            panic!("expected an aggregate error");
        };
        assert_eq!(errors[0].message, "boom");
        assert_eq!(query, "{ a }");
        assert_eq!(sent, variables);
        assert_eq!(data, Some(json!({"a": null})));
    }

    #[tokio::test]
    async fn null_data_with_errors_wraps_exactly_those_errors() {
        let error = graphql::Error::builder()
            .message("author service unavailable")
            .path(crate::json_ext::Path::empty().join_key("author"))
            .extension_code("UNAVAILABLE")
            .build();
        let sdk = requester(vec![
            Response::builder()
                .data(Value::Null)
                .error(error.clone())
                .build(),
        ]);
        let Err(SdkError::Aggregate { errors, data, .. }) = sdk.request("{ author { name } }", Object::new()).await
        else {
            panic!("expected an aggregate error");
        };
        assert_eq!(errors, vec![error]);
        assert_eq!(data, Some(Value::Null));
    }

    #[tokio::test]
    async fn empty_responses_are_malformed() {
        let sdk = requester(vec![Response::default()]);
        assert!(matches!(
            sdk.request("{ a }", Object::new()).await,
            Err(SdkError::MalformedResult)
        ));
    }
}
