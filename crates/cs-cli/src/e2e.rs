use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;

pub struct E2eOptions {
    pub chromedriver_url: String,
    pub extension_path: String,
    pub headless: bool,
}

pub fn run_e2e(opts: E2eOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_e2e_async(opts))
}

async fn run_e2e_async(opts: E2eOptions) -> Result<(), String> {
    let extension_path = canonicalize_path(&opts.extension_path)?;
    let caps = chrome_caps(&extension_path, opts.headless)?;

    let driver = WebDriver::new(&opts.chromedriver_url, caps)
        .await
        .map_err(|e| format!("Failed to connect to chromedriver: {}", e))?;

    let cdp = ChromeDevTools::new(driver.handle.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let extension_id = find_extension_id(&cdp)
        .await
        .ok_or_else(|| "Failed to locate extension background page".to_string())?;

    let mut errors = Vec::new();

    if let Err(e) = check_page_has_selector(
        &driver,
        &format!("chrome-extension://{}/popup/popup.html", extension_id),
        "#charset-menu",
    )
    .await
    {
        errors.push(format!("Popup page check failed: {}", e));
    }

    if let Err(e) = check_page_has_selector(
        &driver,
        &format!("chrome-extension://{}/options/options.html", extension_id),
        "#override-list",
    )
    .await
    {
        errors.push(format!("Options page check failed: {}", e));
    }

    if let Err(e) = check_worker_exports(&driver, &extension_id).await {
        errors.push(format!("Worker export checks failed: {}", e));
    }

    if let Err(e) = check_content_script(&driver).await {
        errors.push(format!("Content script check failed: {}", e));
    }

    driver.quit().await.ok();

    if errors.is_empty() {
        println!("✓ E2E checks passed");
        Ok(())
    } else {
        Err(format!("E2E failed:\n- {}", errors.join("\n- ")))
    }
}

fn chrome_caps(extension_path: &Path, headless: bool) -> Result<ChromeCapabilities, String> {
    let mut args = vec![
        format!("--disable-extensions-except={}", extension_path.display()),
        format!("--load-extension={}", extension_path.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-default-apps".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }

    let mut caps = ChromeCapabilities::new();
    for arg in &args {
        caps.add_arg(arg)
            .map_err(|e| format!("Failed to set chrome arg '{}': {}", arg, e))?;
    }
    Ok(caps)
}

async fn find_extension_id(cdp: &ChromeDevTools) -> Option<String> {
    let targets = cdp.execute_cdp("Target.getTargets").await.ok()?;
    targets.get("targetInfos")?.as_array()?.iter().find_map(|info| {
        let target_type = info.get("type").and_then(Value::as_str)?;
        if target_type != "background_page" && target_type != "service_worker" {
            return None;
        }
        let url = info.get("url").and_then(Value::as_str)?;
        let id = url.strip_prefix("chrome-extension://")?.split('/').next()?;
        (!id.is_empty()).then(|| id.to_string())
    })
}

async fn check_page_has_selector(driver: &WebDriver, url: &str, selector: &str) -> WebDriverResult<()> {
    driver.goto(url).await?;
    driver.find(By::Css(selector)).await?;
    Ok(())
}

/// Probes the wasm bridge from inside the extension's background context.
async fn check_worker_exports(driver: &WebDriver, extension_id: &str) -> Result<(), String> {
    let url = format!(
        "chrome-extension://{}/_generated_background_page.html",
        extension_id
    );
    driver
        .goto(&url)
        .await
        .map_err(|e| format!("Failed to open background page: {}", e))?;

    probe(
        driver,
        "return (window.csw?.version?.() ?? '').length > 0;",
        "WASM module not loaded",
    )
    .await?;
    probe(
        driver,
        "return window.csw?.canonical_label?.('gbk') === 'GBK';",
        "Expected canonical_label('gbk') to be 'GBK'",
    )
    .await?;
    probe(
        driver,
        "return (window.csw?.is_supported_label?.('klingon') ?? true) === false;",
        "Expected is_supported_label('klingon') to be false",
    )
    .await?;
    probe(
        driver,
        "return window.csw?.host_from_url?.('https://user@example.com:8080/x?y#z') === 'example.com';",
        "Expected host_from_url to strip scheme, userinfo, and port",
    )
    .await?;
    Ok(())
}

async fn check_content_script(driver: &WebDriver) -> Result<(), String> {
    driver
        .goto("https://example.com")
        .await
        .map_err(|e| format!("Failed to navigate to example.com: {}", e))?;
    probe(
        driver,
        "return document.documentElement.dataset.cswReady === '1';",
        "Content script did not inject",
    )
    .await
}

async fn probe(driver: &WebDriver, script: &str, failure: &str) -> Result<(), String> {
    let ok = eval_bool(driver, script)
        .await
        .map_err(|e| format!("Failed to evaluate probe: {}", e))?;
    if ok {
        Ok(())
    } else {
        Err(failure.to_string())
    }
}

async fn eval_bool(driver: &WebDriver, script: &str) -> WebDriverResult<bool> {
    let result = driver.execute(script, Vec::<Value>::new()).await?;
    Ok(result.json().as_bool().unwrap_or(false))
}

fn canonicalize_path(path: &str) -> Result<PathBuf, String> {
    std::fs::canonicalize(path)
        .map_err(|e| format!("Failed to resolve '{}': {}", path, e))
}
