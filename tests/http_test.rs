use hestia::error::HestiaError;
use hestia::plugin::{Config, Context};
use mockito::Matcher;

fn config(yaml: String) -> Config {
    Config::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn http_getter_scales_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/power")
        .with_body("1234")
        .create_async()
        .await;

    let ctx = Context::builtin().unwrap();
    let cc = config(format!("source: http\nuri: {}/power\nscale: 0.1", server.url()));

    let g = cc.float_getter(&ctx).await.unwrap();
    assert!((g().await.unwrap() - 123.4).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_getter_jq_and_cache() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/status")
        .with_header("content-type", "application/json")
        .with_body(r#"{"meters":[{"power":1.5},{"power":-230}]}"#)
        .expect(1)
        .create_async()
        .await;

    let ctx = Context::builtin().unwrap();
    let cc = config(format!(
        "source: http\nuri: {}/status\njq: .meters[1].power\ncache: 1m",
        server.url()
    ));

    let g = cc.int_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), -230);
    assert_eq!(g().await.unwrap(), -230);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_setter_renders_template() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/limit")
        .match_query(Matcher::UrlEncoded("current".into(), "16".into()))
        .match_body(r#"{"enable":true}"#)
        .create_async()
        .await;

    let ctx = Context::builtin().unwrap();
    let cc = config(format!(
        "source: http\nmethod: PUT\nuri: '{}/limit?current=${{current}}'\nbody: '{{\"enable\":true}}'",
        server.url()
    ));

    let set = cc.int_setter(&ctx, "current").await.unwrap();
    set(16).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn http_known_errors_are_typed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/soc")
        .with_status(503)
        .with_body("ErrAsleep")
        .create_async()
        .await;
    server
        .mock("GET", "/broken")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let ctx = Context::builtin().unwrap();

    let g = config(format!("source: http\nuri: {}/soc", server.url()))
        .float_getter(&ctx)
        .await
        .unwrap();
    assert!(matches!(g().await, Err(HestiaError::Asleep)));

    let g = config(format!("source: http\nuri: {}/broken", server.url()))
        .float_getter(&ctx)
        .await
        .unwrap();
    assert!(matches!(
        g().await,
        Err(HestiaError::Http { status: 500, .. })
    ));
}
