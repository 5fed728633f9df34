use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::task::Poll;

use apollo_compiler::Schema;
use async_trait::async_trait;
use parking_lot::Mutex;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;

use crate::configuration::GraphQLHandlerConfig;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::source::HandlerContext;
use crate::source::MeshHandler;
use crate::source::MeshSource;
use crate::source::ServiceExecutor;
use crate::source::SourceRequest;
use crate::template::Template;

/// A GraphQL API reached over HTTP.
pub struct GraphQLHandler {
    config: GraphQLHandlerConfig,
    headers: Arc<Vec<(String, Template)>>,
}

impl GraphQLHandler {
    /// Fails when a header value is not a valid template.
    pub fn new(config: GraphQLHandlerConfig) -> Result<Self, BoxError> {
        let headers = config
            .headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.parse::<Template>()?)))
            .collect::<Result<Vec<_>, BoxError>>()?;
        Ok(Self {
            config,
            headers: Arc::new(headers),
        })
    }

    async fn load_sdl(
        &self,
        context: &HandlerContext,
        client: &HttpClient,
    ) -> Result<String, BoxError> {
        if let Some(sdl) = &self.config.schema {
            return Ok(sdl.clone());
        }
        let Some(url) = &self.config.schema_url else {
            return Err(format!(
                "source '{}' has neither a schema nor a schema url",
                context.source_name
            )
            .into());
        };

        let cache_key = format!("graphql-mesh:sdl:{url}");
        if self.config.cache_schema {
            if let Some(sdl) = context.cache.get(&cache_key).await {
                if let Some(sdl) = sdl.as_str() {
                    tracing::debug!(source = %context.source_name, "using cached schema");
                    return Ok(sdl.to_string());
                }
            }
        }

        tracing::debug!(source = %context.source_name, %url, "fetching schema");
        let sdl = client
            .client()?
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if self.config.cache_schema {
            context.cache.set(cache_key, Value::from(sdl.as_str())).await;
        }
        Ok(sdl)
    }
}

#[async_trait]
impl MeshHandler for GraphQLHandler {
    async fn get_mesh_source(&self, context: HandlerContext) -> Result<MeshSource, BoxError> {
        let client = Arc::new(HttpClient::default());
        let sdl = self.load_sdl(&context, &client).await?;
        let schema = Schema::parse_and_validate(sdl, format!("{}.graphql", context.source_name))
            .map_err(|with_errors| with_errors.errors.to_string())?;

        let on_destroy = client.clone();
        context.pubsub.destroy().subscribe(move |_| on_destroy.close());

        let http = HttpService {
            source: context.source_name.clone().into(),
            endpoint: self.config.endpoint.clone().into(),
            headers: self.headers.clone(),
            client,
        };
        let service = ServiceBuilder::new()
            .option_layer(self.config.timeout.map(TimeoutLayer::new))
            .service(http);

        let mut source = MeshSource::new(schema, Arc::new(ServiceExecutor::new(service)));
        source.context_variables = self.config.context_variables.clone();
        Ok(source)
    }
}

/// A `reqwest` client created on first use and released on destroy.
#[derive(Default)]
struct HttpClient {
    client: Mutex<Option<reqwest::Client>>,
    closed: AtomicBool,
}

impl HttpClient {
    fn client(&self) -> Result<reqwest::Client, BoxError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("the mesh has been destroyed".into());
        }
        let mut client = self.client.lock();
        match &*client {
            Some(client) => Ok(client.clone()),
            None => {
                let created = reqwest::Client::builder().build()?;
                *client = Some(created.clone());
                Ok(created)
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.client.lock().take();
    }
}

#[derive(Clone)]
struct HttpService {
    source: Arc<str>,
    endpoint: Arc<str>,
    headers: Arc<Vec<(String, Template)>>,
    client: Arc<HttpClient>,
}

impl Service<SourceRequest> for HttpService {
    type Response = graphql::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SourceRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            let client = this.client.client()?;
            let mut values = Object::new();
            values.insert("context", Value::Object(request.context));
            let values = Value::Object(values);
            let mut builder = client.post(this.endpoint.as_ref()).json(&request.request);
            for (name, template) in this.headers.iter() {
                builder = builder.header(name.as_str(), template.render(&values));
            }
            tracing::trace!(source = %this.source, endpoint = %this.endpoint, "sending request");
            let response = builder.send().await?.error_for_status()?;
            let body = response.bytes().await?;
            let response: graphql::Response = serde_json::from_slice(&body)?;
            tracing::trace!(source = %this.source, errors = response.errors.len(), "received response");
            Ok(response)
        })
    }
}
