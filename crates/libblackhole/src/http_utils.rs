use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

pub(crate) async fn check_response(r: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if r.status().is_success() {
        return Ok(r);
    }
    let status = r.status();
    let url = r.url().clone();
    let body = r.text().await.unwrap_or_default();
    anyhow::bail!("{} -> {}: {}", url, status, body)
}

pub(crate) async fn json_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<T> {
    let url = response.url().clone();
    let response = check_response(response).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "error deserializing response from {:?} as {:?}",
            url,
            std::any::type_name::<T>(),
        )
    })
}

/// Run a request-producing closure through the shared retry policy:
/// one retry after a fixed one-second delay, success = 2xx.
pub(crate) async fn with_retries<T, Fut>(f: impl FnMut() -> Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    f.retry(
        ConstantBuilder::default()
            .with_delay(Duration::from_secs(1))
            .with_max_times(1),
    )
    .notify(|err, retry_in| debug!(?retry_in, "request failed, will retry: {err:#}"))
    .await
}

// One-shot request helpers. Each builds its request from borrowed inputs so
// `with_retries(|| get_json(...))` can re-issue it on the retry attempt.

pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
) -> anyhow::Result<T> {
    json_response(http.get(url.clone()).query(query).send().await?).await
}

pub(crate) async fn get_ok(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
) -> anyhow::Result<()> {
    check_response(http.get(url.clone()).query(query).send().await?).await?;
    Ok(())
}

pub(crate) async fn put_bytes_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
    body: &[u8],
) -> anyhow::Result<T> {
    json_response(
        http.put(url.clone())
            .query(query)
            .body(body.to_vec())
            .send()
            .await?,
    )
    .await
}

pub(crate) async fn put_json_ok(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
    body: &impl serde::Serialize,
) -> anyhow::Result<()> {
    check_response(
        http.put(url.clone())
            .query(query)
            .json(body)
            .send()
            .await?,
    )
    .await?;
    Ok(())
}

pub(crate) async fn post_form_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
    form: &[(&str, &str)],
) -> anyhow::Result<T> {
    json_response(
        http.post(url.clone())
            .query(query)
            .form(form)
            .send()
            .await?,
    )
    .await
}

pub(crate) async fn post_form_ok(
    http: &reqwest::Client,
    url: &Url,
    form: &[(&str, &str)],
) -> anyhow::Result<()> {
    check_response(http.post(url.clone()).form(form).send().await?).await?;
    Ok(())
}

pub(crate) async fn post_json_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
    body: &impl serde::Serialize,
) -> anyhow::Result<T> {
    json_response(
        http.post(url.clone())
            .query(query)
            .json(body)
            .send()
            .await?,
    )
    .await
}

pub(crate) async fn post_ok(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
) -> anyhow::Result<()> {
    check_response(http.post(url.clone()).query(query).send().await?).await?;
    Ok(())
}

pub(crate) async fn delete_ok(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
) -> anyhow::Result<()> {
    check_response(http.delete(url.clone()).query(query).send().await?).await?;
    Ok(())
}

pub(crate) async fn delete_form_ok(
    http: &reqwest::Client,
    url: &Url,
    form: &[(&str, &str)],
) -> anyhow::Result<()> {
    check_response(http.delete(url.clone()).form(form).send().await?).await?;
    Ok(())
}

pub(crate) async fn delete_json_ok(
    http: &reqwest::Client,
    url: &Url,
    query: &[(&str, &str)],
    body: &impl serde::Serialize,
) -> anyhow::Result<()> {
    check_response(
        http.delete(url.clone())
            .query(query)
            .json(body)
            .send()
            .await?,
    )
    .await?;
    Ok(())
}
