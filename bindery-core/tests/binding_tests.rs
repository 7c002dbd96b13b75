use bindery_core::{
    BindError, BindableEnum, BinderChain, BindingMap, HttpRequest, HttpResponse, ParameterDescription,
    PathVariables, Session, TypeDescriptor, value,
};
use proptest::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Pojo {
    name: String,
    value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Priority {
    Low,
    High,
}

impl BindableEnum for Priority {
    const VARIANTS: &'static [(&'static str, Self)] = &[("LOW", Priority::Low), ("HIGH", Priority::High)];
}

/// Not convertible from text.
#[derive(Debug)]
struct Color(#[allow(dead_code)] u8, #[allow(dead_code)] u8, #[allow(dead_code)] u8);

fn run(map: &mut BindingMap, request: HttpRequest, path_vars: &[(&str, &str)]) -> Result<(), BindError> {
    let vars: PathVariables = path_vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    BinderChain::standard().bind_all(map, &Arc::new(request), &Arc::new(HttpResponse::new()), &vars)
}

#[test]
fn test_json_body_binds_single_pojo() {
    let label = ParameterDescription::new("label", TypeDescriptor::scalar::<String>());
    let mut map = BindingMap::new([
        label.clone(),
        ParameterDescription::new("pojo", TypeDescriptor::bean::<Pojo>()),
    ]);
    map.prebind(&label, value("kept".to_string()));

    let request = HttpRequest::new("POST", "/pojo")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"name":"pojo name","value":5}"#);
    run(&mut map, request, &[]).unwrap();

    assert_eq!(
        map.value_of::<Pojo>("pojo"),
        Some(&Pojo {
            name: "pojo name".to_string(),
            value: 5,
        })
    );
    assert_eq!(map.value_of::<String>("label").map(String::as_str), Some("kept"));
}

#[test]
fn test_json_body_exploded_fields() {
    let mut map = BindingMap::new([
        ParameterDescription::new("name", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("value", TypeDescriptor::scalar::<i64>()),
        ParameterDescription::new("priority", TypeDescriptor::enumeration::<Priority>()),
    ]);
    let request = HttpRequest::new("POST", "/fields")
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_body(r#"{"name":"n","value":7,"priority":"high","extra":true}"#);
    run(&mut map, request, &[]).unwrap();

    assert_eq!(map.value_of::<String>("name").map(String::as_str), Some("n"));
    assert_eq!(map.value_of::<i64>("value"), Some(&7));
    assert_eq!(map.value_of::<Priority>("priority"), Some(&Priority::High));
}

#[test]
fn test_json_body_failures_are_bind_errors() {
    let mut map = BindingMap::new([ParameterDescription::new("pojo", TypeDescriptor::bean::<Pojo>())]);
    let request = HttpRequest::new("POST", "/pojo")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"name": "#);
    let err = run(&mut map, request, &[]).unwrap_err();
    assert_eq!(err.parameter(), "pojo");
    assert!(map.value_of::<Pojo>("pojo").is_none());

    let mut map = BindingMap::new([
        ParameterDescription::new("name", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("value", TypeDescriptor::scalar::<i32>()),
    ]);
    let request = HttpRequest::new("POST", "/fields")
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"name":"n","value":"abc"}"#);
    let err = run(&mut map, request, &[]).unwrap_err();
    assert_eq!(err.parameter(), "value");
}

#[test]
fn test_path_variables_convert_or_stay_unbound() {
    let mut map = BindingMap::new([
        ParameterDescription::new("param2", TypeDescriptor::scalar::<i32>()),
        ParameterDescription::new("color", TypeDescriptor::opaque::<Color>()),
    ]);
    run(
        &mut map,
        HttpRequest::new("GET", "/items/2/red"),
        &[("param2", "2"), ("color", "red")],
    )
    .unwrap();

    assert_eq!(map.value_of::<i32>("param2"), Some(&2));
    assert!(map.value_of::<Color>("color").is_none());
    assert_eq!(map.unbound().len(), 1);
}

#[test]
fn test_path_variable_wins_over_query() {
    let mut map = BindingMap::new([ParameterDescription::new("id", TypeDescriptor::scalar::<u64>())]);
    run(&mut map, HttpRequest::new("GET", "/items/1?id=2"), &[("id", "1")]).unwrap();
    assert_eq!(map.value_of::<u64>("id"), Some(&1));
}

#[test]
fn test_headers_bind_by_normalized_name() {
    let mut map = BindingMap::new([
        ParameterDescription::new("xCustomHeader", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("x-request-id", TypeDescriptor::scalar::<u32>()),
    ]);
    let request = HttpRequest::new("GET", "/")
        .with_header("X-Custom-Header", "hello")
        .with_header("X-Request-Id", "17");
    run(&mut map, request, &[]).unwrap();

    assert_eq!(map.value_of::<String>("xCustomHeader").map(String::as_str), Some("hello"));
    assert_eq!(map.value_of::<u32>("x-request-id"), Some(&17));
}

#[test]
fn test_query_form_session_and_cookie_sources() {
    let session = Arc::new(Session::with_id("s-1"));
    session.set_attribute("user", "ada".to_string());

    let mut map = BindingMap::new([
        ParameterDescription::new("page", TypeDescriptor::scalar::<u32>()),
        ParameterDescription::new("tags", TypeDescriptor::list::<String>(TypeDescriptor::scalar::<String>())),
        ParameterDescription::new("title", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("user", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("session", TypeDescriptor::session()),
        ParameterDescription::new("theme", TypeDescriptor::scalar::<String>()),
    ]);
    let request = HttpRequest::new("POST", "/posts?page=3&tags=a&tags=b")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_header("Cookie", "theme=dark; lang=en")
        .with_body("title=Hello+World&page=9")
        .with_session(session.clone());
    run(&mut map, request, &[]).unwrap();

    assert_eq!(map.value_of::<u32>("page"), Some(&3));
    assert_eq!(
        map.value_of::<Vec<String>>("tags"),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(map.value_of::<String>("title").map(String::as_str), Some("Hello World"));
    assert_eq!(map.value_of::<String>("user").map(String::as_str), Some("ada"));
    assert_eq!(map.shared::<Session>("session").map(|s| s.id().to_string()), Some("s-1".to_string()));
    assert_eq!(map.value_of::<String>("theme").map(String::as_str), Some("dark"));
}

#[test]
fn test_unconvertible_query_value_is_bind_error() {
    let page = ParameterDescription::new("page", TypeDescriptor::scalar::<u32>());
    let mut map = BindingMap::new([page.clone()]);
    let err = run(&mut map, HttpRequest::new("GET", "/?page=abc"), &[]).unwrap_err();

    assert!(matches!(err, BindError::Conversion { .. }));
    assert_eq!(err.parameter(), "page");
    assert!(!map.is_bound(&page));
}

/// Binds through the standard chain and hands back the request to inspect its body.
fn run_keeping_request(map: &mut BindingMap, request: HttpRequest) -> Arc<HttpRequest> {
    let request = Arc::new(request);
    BinderChain::standard()
        .bind_all(map, &request, &Arc::new(HttpResponse::new()), &PathVariables::new())
        .unwrap();
    request
}

fn request_consumer_params() -> BindingMap {
    BindingMap::new([
        ParameterDescription::new("req", TypeDescriptor::request()),
        ParameterDescription::new("title", TypeDescriptor::scalar::<String>()),
    ])
}

#[test]
fn test_json_body_left_for_request_parameter() {
    let mut map = request_consumer_params();
    let request = run_keeping_request(
        &mut map,
        HttpRequest::new("POST", "/notes")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"title":"Report"}"#),
    );

    assert!(request.has_body());
    assert!(map.value_of::<String>("title").is_none());
    assert!(map.shared::<HttpRequest>("req").is_some_and(|r| Arc::ptr_eq(&r, &request)));
}

#[test]
fn test_form_body_left_for_request_parameter() {
    let mut map = request_consumer_params();
    let request = run_keeping_request(
        &mut map,
        HttpRequest::new("POST", "/notes")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("title=Report"),
    );

    assert!(request.has_body());
    assert!(map.value_of::<String>("title").is_none());
}

#[test]
fn test_multipart_body_left_for_request_parameter() {
    let body = [
        "--xyz\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
        "Report\r\n",
        "--xyz--\r\n",
    ]
    .concat();
    let mut map = request_consumer_params();
    let request = run_keeping_request(
        &mut map,
        HttpRequest::new("POST", "/upload")
            .with_header("Content-Type", "multipart/form-data; boundary=xyz")
            .with_body(body),
    );

    assert!(request.has_body());
    assert!(map.value_of::<String>("title").is_none());
}

#[test]
fn test_request_and_response_injection() {
    let mut map = BindingMap::new([
        ParameterDescription::new("req", TypeDescriptor::request()),
        ParameterDescription::new("resp", TypeDescriptor::response()),
    ]);
    run(&mut map, HttpRequest::new("GET", "/inject"), &[]).unwrap();

    assert_eq!(map.shared::<HttpRequest>("req").map(|r| r.path.clone()), Some("/inject".to_string()));
    assert!(map.shared::<HttpResponse>("resp").is_some());
}

#[test]
fn test_malformed_multipart_leaves_fields_unbound() {
    let body = [
        "--xyz\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
        "Report\r\n",
        "--xyz\r\n",
        "Content-Disposition: form-data; name=\"attachment\"; filename=\"a.txt\"\r\n\r\n",
        "partial",
    ]
    .concat();
    let mut map = BindingMap::new([
        ParameterDescription::new("title", TypeDescriptor::scalar::<String>()),
        ParameterDescription::new("attachment", TypeDescriptor::file()),
    ]);
    let request = HttpRequest::new("POST", "/upload")
        .with_header("Content-Type", "multipart/form-data; boundary=xyz")
        .with_body(body);
    run(&mut map, request, &[]).unwrap();

    assert_eq!(map.value_of::<String>("title").map(String::as_str), Some("Report"));
    assert!(map.value_of::<bindery_core::UploadedFile>("attachment").is_none());
}

proptest! {
    #[test]
    fn prop_prebound_values_are_never_overwritten(
        prebound in "[a-z]{1,8}",
        query in "[a-z]{1,8}",
        header in "[a-z]{1,8}",
    ) {
        let name = ParameterDescription::new("name", TypeDescriptor::scalar::<String>());
        let mut map = BindingMap::new([
            name.clone(),
            ParameterDescription::new("other", TypeDescriptor::scalar::<String>()),
        ]);
        map.prebind(&name, value(prebound.clone()));

        let request = HttpRequest::new("GET", format!("/x?name={}&other={}", query, query))
            .with_header("Name", header.clone());
        run(&mut map, request, &[("name", "path")]).unwrap();

        prop_assert_eq!(map.value_of::<String>("name"), Some(&prebound));
        prop_assert_eq!(map.value_of::<String>("other"), Some(&query));
    }
}
