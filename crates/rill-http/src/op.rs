//! `http_request` op.

use async_trait::async_trait;
use rill_core::{Error, Result, Row};
use rill_runtime::eval::{CompiledField, RenderOptions, UserFunction, render};
use rill_runtime::op::{ForEach, Op, OpDefinition, OpOptions, PreviewMode};
use rill_runtime::project::SourceDefinition;
use rill_runtime::{DataLoader, ExecutionContext, Scope};
use serde_json::Value;

use crate::auth::AuthStrategy;
use crate::client::HttpClient;
use crate::request::RequestTemplate;
use crate::response::{HttpResponse, ParserOutput};

const TRACING_TARGET: &str = "rill_http::op";

/// Source kind an `http_request` op may authenticate with.
pub const HTTP_SOURCE_KIND: &str = "http";

/// Issues HTTP requests, parses each response with user code and loads the
/// returned rows.
///
/// The parser decides pagination: as long as it returns `while: true`, the
/// request is resolved again against the updated variables and re-sent.
/// With a `for_each` section, the whole pagination loop runs once per row of
/// the scanned table.
#[derive(Debug)]
pub struct HttpRequestOp {
    definition: OpDefinition,
    client: HttpClient,
    for_each: Option<ForEach>,
}

/// State built at the start of one run.
struct Prepared {
    request: RequestTemplate,
    auth: Option<AuthStrategy>,
    parser: UserFunction,
}

impl HttpRequestOp {
    pub const NAME: &'static str = "http_request";

    pub fn new(definition: OpDefinition, client: HttpClient) -> Result<Self> {
        let params = definition.params();
        let request = params.required_section("request")?;
        request.required("url")?;
        request.required("method")?;

        let response = params.required_section("response")?;
        if response.get("parser").is_some() {
            return Err(Error::invalid_definition().with_message(format!(
                "parser is not supported. Use parser_expression instead ({})",
                definition.document()
            )));
        }
        if response.field("parser")?.is_none() {
            return Err(response.missing("parser_expression"));
        }

        let for_each = ForEach::parse(&params)?;
        Ok(Self {
            definition,
            client,
            for_each,
        })
    }

    fn prepare(&self, ctx: &mut ExecutionContext) -> Result<Prepared> {
        let params = self.definition.params();
        let request = params.required_section("request")?;
        let sandbox = ctx.job().sandbox().clone();

        let auth = match request.string(ctx, "source")? {
            None => None,
            Some(name) => {
                let source = ctx.project().source(&name)?;
                if source.kind != HTTP_SOURCE_KIND {
                    return Err(Error::invalid_definition().with_message(format!(
                        "Source '{name}' used by a request must be of type '{HTTP_SOURCE_KIND}', got '{}'",
                        source.kind
                    )));
                }
                bind_source_variables(ctx, &source)?;
                source
                    .params()
                    .section("auth")?
                    .map(|auth| AuthStrategy::from_params(ctx, &auth))
                    .transpose()?
            }
        };

        let template = RequestTemplate::compile(ctx, &request, &sandbox)?;
        let parser = match params.required_section("response")?.required("parser")?.compile(&sandbox)? {
            CompiledField::Function(parser) => parser,
            CompiledField::Template(_) => {
                return Err(Error::invalid_definition()
                    .with_message("parser is not supported. Use parser_expression instead"));
            }
        };

        Ok(Prepared {
            request: template,
            auth,
            parser,
        })
    }

    /// Sends one request and logs it without parsing or loading anything.
    async fn preview(&self, ctx: &ExecutionContext, prepared: &mut Prepared, mode: PreviewMode) -> Result<()> {
        let request = prepared.request.resolve(ctx)?;
        let response = self.client.send(&request, prepared.auth.as_mut()).await?;
        let response = HttpResponse::read(response).await?;

        match mode {
            PreviewMode::PreviewTrace => tracing::info!(
                target: TRACING_TARGET,
                "HTTP request trace:\n----------------- TRACE START -----------------\n{}\n\n{}\n----------------- TRACE END -----------------",
                request.describe(),
                response.describe()
            ),
            PreviewMode::PreviewPretty => tracing::info!(
                target: TRACING_TARGET,
                status = response.status,
                "HTTP request preview:\n{}\n\nResponse body:\n{}",
                request.describe(),
                response.pretty_body()
            ),
        }
        Ok(())
    }

    /// Runs the pagination loop once per scanned row.
    async fn scan(
        &self,
        ctx: &mut ExecutionContext,
        for_each: &ForEach,
        prepared: &mut Prepared,
        loader: &mut DataLoader,
    ) -> Result<()> {
        let mut scan = for_each.open(ctx).await?;
        let result = async {
            while let Some(row) = scan.next().await? {
                ctx.set_variable(scan.variable().to_owned(), row.into_value(), Scope::Local);
                self.paginate(ctx, prepared, loader).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        let closed = scan.close().await;
        result.and(closed)
    }

    async fn paginate(&self, ctx: &mut ExecutionContext, prepared: &mut Prepared, loader: &mut DataLoader) -> Result<()> {
        let mut pages = 0usize;
        loop {
            pages += 1;
            let request = prepared.request.resolve(ctx)?;
            tracing::debug!(
                target: TRACING_TARGET,
                page = pages,
                method = %request.method,
                url = %request.full_url(),
                "Sending request"
            );

            let response = self.client.send(&request, prepared.auth.as_mut()).await?;
            let response = HttpResponse::read(response).await?;
            tracing::debug!(target: TRACING_TARGET, page = pages, status = response.status, "Response received");

            let output = prepared.parser.apply(ctx.view(), vec![response.to_value()])?;
            let output = ParserOutput::from_value(output)?;
            for (name, definition) in output.variables {
                ctx.set_variable_from_definition(&name, definition)?;
            }
            loader.run(&output.tables).await?;

            if !output.repeat {
                break;
            }
        }

        tracing::debug!(target: TRACING_TARGET, pages, rows = loader.rows_written(), "Pagination finished");
        Ok(())
    }
}

#[async_trait]
impl Op for HttpRequestOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    fn title(&self) -> String {
        let url = self
            .definition
            .fields()
            .get("request")
            .and_then(|request| request.get("url"))
            .and_then(Value::as_str);
        self.definition.title(url)
    }

    async fn run(&self, ctx: &mut ExecutionContext, options: &OpOptions) -> Result<()> {
        let mut ctx = ctx.fork();
        let mut prepared = self.prepare(&mut ctx)?;

        if let Some(record) = &options.foreach_record {
            let for_each = self.for_each.as_ref().ok_or_else(|| {
                Error::invalid_definition()
                    .with_message("A for_each record was given but the op has no for_each section")
            })?;
            let variable = for_each.variable(&ctx)?;
            let row = Row::try_from(record.clone())?;
            tracing::info!(target: TRACING_TARGET, variable = %variable, "Using the given for_each record");
            ctx.set_variable(variable, row.into_value(), Scope::Local);
        }

        if let Some(mode) = options.preview {
            return self.preview(&ctx, &mut prepared, mode).await;
        }

        let params = self.definition.params();
        let response = params.required_section("response")?;
        let source = response.string(&ctx, "source")?;
        let table = response.table_address(&ctx)?;
        let mut loader = DataLoader::new(ctx.project().clone(), source, table);

        let result = match (&self.for_each, &options.foreach_record) {
            (Some(for_each), None) => self.scan(&mut ctx, for_each, &mut prepared, &mut loader).await,
            _ => self.paginate(&mut ctx, &mut prepared, &mut loader).await,
        };
        let closed = loader.close().await;
        tracing::info!(target: TRACING_TARGET, rows = loader.rows_written(), "Request op finished");
        result.and(closed)
    }
}

/// Binds the `variables` of a source as locals, rendering each against the
/// ones bound before it.
fn bind_source_variables(ctx: &mut ExecutionContext, source: &SourceDefinition) -> Result<()> {
    let Some(Value::Object(variables)) = source.fields.get("variables") else {
        return Ok(());
    };
    for (name, value) in variables {
        let value = render(&ctx.view(), value, RenderOptions::default())?;
        ctx.set_variable(name.clone(), value, Scope::Local);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rill_core::{ErrorKind, TableAddress};
    use rill_runtime::JobHandle;
    use rill_runtime::eval::{Document, Sandbox};
    use rill_runtime::op::OpRegistry;
    use rill_runtime::project::MemoryProject;
    use serde_json::{Map, json};
    use wiremock::matchers::{any, body_string_contains, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const PAGED_PARSER: &str = r#"
        fn evaluate(context, response) {
            let body = response.json;
            #{
                "variables": #{ "page": body.page + 1 },
                "tables": body.items,
                "while": body.more
            }
        }
    "#;

    const EMPTY_PARSER: &str = "fn evaluate(context, response) { #{} }";

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a mapping, got {other}"),
        }
    }

    fn project() -> MemoryProject {
        MemoryProject::new("test").with_memory_source("warehouse")
    }

    fn context(project: MemoryProject) -> ExecutionContext {
        let handle = JobHandle::new(Arc::new(project), Arc::new(OpRegistry::new()), Sandbox::default());
        ExecutionContext::new(handle)
    }

    fn op(value: Value) -> Result<HttpRequestOp> {
        let definition = OpDefinition::from_value(value, Document::new("flows/test.yaml"))?;
        HttpRequestOp::new(definition, HttpClient::with_defaults()?)
    }

    #[tokio::test]
    async fn test_paginates_while_parser_asks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1, "items": [{"id": 1}, {"id": 2}], "more": true
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 2, "items": [{"id": 3}], "more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let project = project();
        let store = project.store().clone();
        let mut ctx = context(project);
        ctx.set_variable("base", json!(server.uri()), Scope::Project);
        ctx.set_variable("page", json!(1), Scope::Project);

        let op = op(json!({
            "op": "http_request",
            "id": "items",
            "request": {
                "url": "{{ var('base') }}/items",
                "method": "get",
                "parameters": {"page": "{{ var('page') }}"}
            },
            "response": {"source": "warehouse", "table": "items", "parser_expression": PAGED_PARSER}
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();

        assert_eq!(store.rows(&TableAddress::new("items")).unwrap().len(), 3);
        assert_eq!(ctx.variable("page").unwrap(), json!(3));
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_single_request_without_while() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = context(project());
        let op = op(json!({
            "op": "http_request",
            "request": {"url": format!("{}/ping", server.uri()), "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_key_in_query_and_header() {
        for (add_to, in_query) in [("query", true), ("header", false)] {
            let server = MockServer::start().await;
            Mock::given(any())
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;

            let project = project().with_source_fields(
                "api",
                HTTP_SOURCE_KIND,
                fields(json!({
                    "auth": {"type": "api_key", "key_name": "api_key", "key_value": "secret", "add_to": add_to}
                })),
            );
            let mut ctx = context(project);
            let op = op(json!({
                "op": "http_request",
                "request": {"source": "api", "url": format!("{}/data", server.uri()), "method": "GET"},
                "response": {"parser_expression": EMPTY_PARSER}
            }))
            .unwrap();
            op.run(&mut ctx, &OpOptions::default()).await.unwrap();

            let requests = server.received_requests().await.unwrap();
            assert_eq!(requests.len(), 1);
            let request = &requests[0];
            let in_url = request.url.query_pairs().any(|(k, v)| k == "api_key" && v == "secret");
            assert_eq!(in_url, in_query);
            assert_eq!(request.headers.contains_key("api_key"), !in_query);
        }
    }

    #[tokio::test]
    async fn test_unknown_auth_type_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let project = project().with_source_fields("api", HTTP_SOURCE_KIND, fields(json!({"auth": {"type": "magic"}})));
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "request": {"source": "api", "url": server.uri(), "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        let err = op.run(&mut ctx, &OpOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAuth);
        assert_eq!(err.message(), "Unsupported auth type: magic");
    }

    #[tokio::test]
    async fn test_source_must_be_http() {
        let mut ctx = context(project());
        let op = op(json!({
            "op": "http_request",
            "request": {"source": "warehouse", "url": "http://127.0.0.1:9/", "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        let err = op.run(&mut ctx, &OpOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }

    #[tokio::test]
    async fn test_source_variables_are_local_to_the_run() {
        let server = MockServer::start().await;
        Mock::given(header("authorization", "Bearer abc-prod"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let project = project().with_source_fields(
            "api",
            HTTP_SOURCE_KIND,
            fields(json!({
                "variables": {"env": "prod", "token": "abc-{{ var('env') }}"},
                "auth": {"type": "bearer_token", "token": "{{ var('token') }}"}
            })),
        );
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "request": {"source": "api", "url": server.uri(), "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
        assert!(!ctx.is_variable_defined("token"));
    }

    #[tokio::test]
    async fn test_for_each_over_empty_table_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let project = project();
        let store = project.store().clone();
        store.insert_table(TableAddress::new("ids"), Vec::new());
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "for_each": {"as": "item", "source": "warehouse", "table": "ids"},
            "request": {"url": format!("{}/items/{{{{ var('item').id }}}}", server.uri()), "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_for_each_runs_once_per_row() {
        let server = MockServer::start().await;
        for id in ["1", "2"] {
            Mock::given(path(format!("/items/{id}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": id})))
                .expect(1)
                .mount(&server)
                .await;
        }

        let project = project();
        let store = project.store().clone();
        store.insert_table(
            TableAddress::new("ids"),
            vec![Row::try_from(json!({"id": 1})).unwrap(), Row::try_from(json!({"id": 2})).unwrap()],
        );
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "for_each": {"as": "item", "source": "warehouse", "table": "ids"},
            "request": {"url": format!("{}/items/{{{{ var('item').id }}}}", server.uri()), "method": "GET"},
            "response": {
                "source": "warehouse",
                "table": "details",
                "parser_expression": "fn evaluate(context, response) { #{ \"tables\": [response.json] } }"
            }
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();

        assert_eq!(store.rows(&TableAddress::new("details")).unwrap().len(), 2);
        assert!(!ctx.is_variable_defined("item"));
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_foreach_record_skips_the_scan() {
        let server = MockServer::start().await;
        Mock::given(path("/items/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = context(project());
        let op = op(json!({
            "op": "http_request",
            "for_each": {"as": "item", "source": "warehouse", "table": "does_not_exist"},
            "request": {"url": format!("{}/items/{{{{ var('item').id }}}}", server.uri()), "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        let options = OpOptions {
            foreach_record: Some(json!({"id": 7})),
            ..OpOptions::default()
        };
        op.run(&mut ctx, &options).await.unwrap();
    }

    #[tokio::test]
    async fn test_digest_retries_after_challenge() {
        let server = MockServer::start().await;
        Mock::given(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", r#"Digest realm="api", nonce="abc123", qop="auth""#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let project = project().with_source_fields(
            "api",
            HTTP_SOURCE_KIND,
            fields(json!({"auth": {"type": "digest_auth", "username": "user", "password": "pass"}})),
        );
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "request": {"source": "api", "url": format!("{}/secure", server.uri()), "method": "GET"},
            "response": {
                "parser_expression": "fn evaluate(context, response) { #{ \"variables\": #{ \"status\": response.status_code } } }"
            }
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
        assert_eq!(ctx.variable("status").unwrap(), json!(200));
    }

    #[tokio::test]
    async fn test_oauth2_token_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok", "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let project = project().with_source_fields(
            "api",
            HTTP_SOURCE_KIND,
            fields(json!({"auth": {
                "type": "oauth2",
                "grant_type": "password",
                "token_endpoint": format!("{}/token", server.uri()),
                "client_id": "client",
                "username": "user",
                "password": "pass"
            }})),
        );
        let mut ctx = context(project);
        let parser = r#"
            fn evaluate(context, response) {
                #{ "variables": #{ "done": true }, "while": !context.is_var_defined("done") }
            }
        "#;
        let op = op(json!({
            "op": "http_request",
            "request": {"source": "api", "url": format!("{}/items", server.uri()), "method": "GET"},
            "response": {"parser_expression": parser}
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_reaches_parser() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut ctx = context(project());
        let op = op(json!({
            "op": "http_request",
            "request": {"url": server.uri(), "method": "GET"},
            "response": {
                "parser_expression": "fn evaluate(context, response) { #{ \"variables\": #{ \"status\": response.status_code, \"ok\": response.ok } } }"
            }
        }))
        .unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
        assert_eq!(ctx.variable("status").unwrap(), json!(500));
        assert_eq!(ctx.variable("ok").unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_preview_skips_parser_and_loader() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
            .expect(2)
            .mount(&server)
            .await;

        let project = project();
        let store = project.store().clone();
        let mut ctx = context(project);
        let op = op(json!({
            "op": "http_request",
            "request": {"url": server.uri(), "method": "GET"},
            "response": {
                "source": "warehouse",
                "table": "out",
                "parser_expression": "fn evaluate(context, response) { throw \"parser must not run\"; }"
            }
        }))
        .unwrap();
        for mode in [PreviewMode::PreviewTrace, PreviewMode::PreviewPretty] {
            let options = OpOptions {
                preview: Some(mode),
                ..OpOptions::default()
            };
            op.run(&mut ctx, &options).await.unwrap();
        }
        assert!(store.rows(&TableAddress::new("out")).is_none());
        assert_eq!(store.open_connections(), 0);
    }

    #[test]
    fn test_definition_validation() {
        let err = op(json!({
            "op": "http_request",
            "request": {"url": "http://example.com", "method": "GET"},
            "response": {"parser": "{{ 1 }}"}
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert!(err.message().contains("parser_expression"));

        let err = op(json!({
            "op": "http_request",
            "request": {"method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap_err();
        assert!(err.message().contains("'url'"));

        let err = op(json!({
            "op": "http_request",
            "request": {"url": "http://example.com", "method": "GET"},
            "response": {}
        }))
        .unwrap_err();
        assert!(err.message().contains("parser_expression"));
    }

    #[test]
    fn test_title_falls_back_to_url() {
        let op = op(json!({
            "op": "http_request",
            "request": {"url": "https://api.example.com/items", "method": "GET"},
            "response": {"parser_expression": EMPTY_PARSER}
        }))
        .unwrap();
        assert_eq!(op.title(), "http_request: https://api.example.com/items");
    }
}
