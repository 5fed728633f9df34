//! Helpers shared by unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use apollo_compiler::Schema;
use async_trait::async_trait;
use parking_lot::Mutex;
use tower::BoxError;

use crate::graphql::Response;
use crate::merger::SubSchema;
use crate::source::RawSource;
use crate::source::SourceExecutor;
use crate::source::SourceRequest;
use crate::transforms::Transform;

/// Records every request and answers with a fixed response.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    requests: Mutex<Vec<SourceRequest>>,
    response: Mutex<Response>,
}

impl RecordingExecutor {
    pub(crate) fn respond_with(&self, response: Response) {
        *self.response.lock() = response;
    }

    pub(crate) fn requests(&self) -> Vec<SourceRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.request.query.clone().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl SourceExecutor for RecordingExecutor {
    async fn execute(&self, request: SourceRequest) -> Result<Response, BoxError> {
        self.requests.lock().push(request);
        Ok(self.response.lock().clone())
    }
}

/// A sub-schema over `sdl` whose view is the result of `transforms`.
pub(crate) fn sub_schema(
    name: &str,
    sdl: &str,
    transforms: Vec<Arc<dyn Transform>>,
    executor: Arc<dyn SourceExecutor>,
) -> SubSchema {
    let schema = Arc::new(Schema::parse_and_validate(sdl, format!("{name}.graphql")).unwrap());
    let mut view = (*schema).clone();
    for transform in &transforms {
        view = transform.transform_schema(view).unwrap();
    }
    SubSchema {
        source: Arc::new(RawSource {
            name: name.into(),
            schema,
            executor,
            transforms,
            context_variables: vec!["token".into()],
            batch: false,
            merge: BTreeMap::new(),
        }),
        schema: Arc::new(view),
    }
}
