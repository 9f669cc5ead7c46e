//! Chromium rendering engine via the DevTools protocol.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, SetBlockedUrLsParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams, PrintToPdfParams,
};
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BrowserEngineConfig, EngineFactory, HtmlRenderRequest, ListingInjection, PageRenderRequest,
    RenderEngine, RenderError,
};

/// Time given to late layout work (lazy images, web fonts) after load.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const PREPARE_PAGE_SCRIPT: &str = r#"
(() => {
  document.querySelectorAll('img').forEach((img) => img.setAttribute('loading', 'eager'));
  document.querySelectorAll('details').forEach((d) => d.setAttribute('open', ''));
  return true;
})()
"#;

/// Launches local Chromium processes or connects to a remote one.
#[derive(Debug, Clone)]
pub struct ChromiumEngineFactory {
    config: BrowserEngineConfig,
}

impl ChromiumEngineFactory {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    fn find_chrome(&self) -> Result<PathBuf, RenderError> {
        if let Some(path) = &self.config.executable {
            return Ok(PathBuf::from(shellexpand::tilde(path).as_ref()));
        }

        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(RenderError::Launch(
            "Chrome/Chromium not found; install it or set CHROME_PATH / BROWSER_URL".to_string(),
        ))
    }

    async fn launch_local(&self) -> Result<(Browser, Handler), RenderError> {
        info!("Launching browser (headless={})", self.config.headless);
        let chrome_path = self.find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--font-render-hinting=none");
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| RenderError::Launch(format!("Failed to build browser config: {}", e)))?;

        Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))
    }

    async fn connect_remote(&self, url: &str) -> Result<(Browser, Handler), RenderError> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .map_err(|e| RenderError::Launch(format!("Failed to reach remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| RenderError::Launch(format!("Failed to parse browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RenderError::Launch("No webSocketDebuggerUrl in response".to_string()))?;

        debug!("Connecting to WebSocket: {}", ws_url);
        Browser::connect(ws_url)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))
    }
}

#[async_trait]
impl EngineFactory for ChromiumEngineFactory {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        let (browser, mut handler) = match &self.config.remote_url {
            Some(url) => self.connect_remote(url).await?,
            None => self.launch_local().await?,
        };

        let connected = Arc::new(AtomicBool::new(true));
        let handler_connected = connected.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
            handler_connected.store(false, Ordering::SeqCst);
        });

        Ok(Arc::new(ChromiumEngine {
            browser: Mutex::new(browser),
            connected,
            handler_task,
        }))
    }
}

/// A live Chromium instance.
pub struct ChromiumEngine {
    browser: Mutex<Browser>,
    connected: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
}

impl ChromiumEngine {
    async fn open_page(&self) -> Result<Page, RenderError> {
        let browser = self.browser.lock().await;
        browser.new_page("about:blank").await.map_err(|e| {
            if !self.is_connected() {
                RenderError::Disconnected
            } else {
                RenderError::Navigation {
                    url: "about:blank".to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    async fn print_remote(&self, page: &Page, request: &PageRenderRequest) -> Result<Vec<u8>, RenderError> {
        page.execute(SetDeviceMetricsOverrideParams::new(
            request.viewport.width as i64,
            request.viewport.height as i64,
            1.0,
            false,
        ))
        .await
        .map_err(script_error)?;

        if !request.blocked_url_fragments.is_empty() {
            page.execute(NetworkEnableParams::default())
                .await
                .map_err(script_error)?;
            let patterns = request
                .blocked_url_fragments
                .iter()
                .map(|fragment| format!("*{}*", fragment))
                .collect();
            page.execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(script_error)?;
        }

        dismiss_dialogs(page).await?;

        let url = with_no_cache(&request.url);
        debug!("Navigating to {}", url);
        page.goto(url.as_str())
            .await
            .map_err(|e| RenderError::Navigation {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        evaluate(page, PREPARE_PAGE_SCRIPT.to_string()).await?;
        tokio::time::sleep(SETTLE_DELAY).await;

        if let Some(listing) = &request.listing {
            evaluate(page, listing_script(listing)?).await?;
        }
        evaluate(page, title_link_script(&request.canonical_url)?).await?;
        evaluate(page, style_script(&request.stylesheet)?).await?;

        let builder = PrintToPdfParams::builder()
            .print_background(true)
            .prefer_css_page_size(true);
        let params = match &request.header_footer {
            Some(hf) => builder
                .display_header_footer(true)
                .header_template(hf.header.clone())
                .footer_template(hf.footer.clone())
                .build(),
            None => builder.display_header_footer(false).build(),
        };

        page.pdf(params)
            .await
            .map_err(|e| RenderError::Print(e.to_string()))
    }

    async fn print_html(&self, page: &Page, request: &HtmlRenderRequest) -> Result<Vec<u8>, RenderError> {
        page.set_content(request.html.as_str())
            .await
            .map_err(script_error)?;
        tokio::time::sleep(SETTLE_DELAY).await;

        let params = PrintToPdfParams::builder()
            .print_background(true)
            .paper_width(request.width_in)
            .paper_height(request.height_in)
            .margin_top(0.0)
            .margin_bottom(0.0)
            .margin_left(0.0)
            .margin_right(0.0)
            .build();

        page.pdf(params)
            .await
            .map_err(|e| RenderError::Print(e.to_string()))
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn render_page(&self, request: &PageRenderRequest) -> Result<Vec<u8>, RenderError> {
        let page = self.open_page().await?;
        let result = tokio::time::timeout(request.timeout, self.print_remote(&page, request))
            .await
            .unwrap_or(Err(RenderError::Timeout(request.timeout)));
        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        result
    }

    async fn render_html(&self, request: &HtmlRenderRequest) -> Result<Vec<u8>, RenderError> {
        let page = self.open_page().await?;
        let result = tokio::time::timeout(request.timeout, self.print_html(&page, request))
            .await
            .unwrap_or(Err(RenderError::Timeout(request.timeout)));
        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.handler_task.is_finished()
    }

    async fn close(&self) -> Result<(), RenderError> {
        let result = {
            let mut browser = self.browser.lock().await;
            browser.close().await.map(|_| ())
        };
        self.handler_task.abort();
        self.connected.store(false, Ordering::SeqCst);
        result.map_err(|e| RenderError::Launch(format!("close failed: {}", e)))
    }
}

/// Accept-less dismissal of alert/confirm/prompt so navigation never blocks.
async fn dismiss_dialogs(page: &Page) -> Result<(), RenderError> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(script_error)?;
    let dialog_page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            debug!("Dismissing {:?} dialog: {}", event.r#type, event.message);
            if let Err(e) = dialog_page
                .execute(HandleJavaScriptDialogParams::new(false))
                .await
            {
                warn!("Failed to dismiss dialog: {}", e);
            }
        }
    });
    Ok(())
}

async fn evaluate(page: &Page, script: String) -> Result<(), RenderError> {
    page.evaluate(script).await.map_err(script_error)?;
    Ok(())
}

fn script_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Script(e.to_string())
}

fn with_no_cache(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let query = match parsed.query() {
                Some(q) if !q.is_empty() => format!("{}&no-cache", q),
                _ => "no-cache".to_string(),
            };
            parsed.set_query(Some(&query));
            parsed.to_string()
        }
        Err(_) => format!("{}?no-cache", url),
    }
}

fn json_arg<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, RenderError> {
    serde_json::to_string(value).map_err(script_error)
}

fn listing_script(listing: &ListingInjection) -> Result<String, RenderError> {
    Ok(format!(
        r#"
((listing, heading, removeTitle) => {{
  const directory = document.querySelector('.mt-guide-content, .mt-category-container');
  if (!directory) return false;
  const replacement = document.createElement('div');
  replacement.innerHTML = listing;
  replacement.classList.add('libre-print-directory');
  directory.replaceWith(replacement);
  if (!heading) return true;
  const title = document.querySelector('#title');
  if (!title || !title.parentNode) return true;
  title.setAttribute('style', 'border-bottom: none !important');
  const header = document.createElement('h1');
  header.id = 'libre-print-directory-header';
  header.appendChild(document.createTextNode(heading));
  const container = document.createElement('div');
  container.id = 'libre-print-directory-header-container';
  container.appendChild(header);
  title.parentNode.insertBefore(container, title);
  if (removeTitle) title.remove();
  return true;
}})({}, {}, {})
"#,
        json_arg(&listing.html)?,
        json_arg(&listing.heading)?,
        json_arg(&listing.remove_title)?,
    ))
}

fn title_link_script(url: &str) -> Result<String, RenderError> {
    Ok(format!(
        r#"
((url) => {{
  const title = document.getElementById('title');
  if (!title) return false;
  const color = window.getComputedStyle(title).color;
  const link = document.createElement('a');
  link.href = url;
  link.style.color = color;
  link.style.textDecoration = 'none';
  link.textContent = title.innerText;
  title.replaceChildren(link);
  return true;
}})({})
"#,
        json_arg(url)?
    ))
}

fn style_script(css: &str) -> Result<String, RenderError> {
    Ok(format!(
        r#"
((css) => {{
  const style = document.createElement('style');
  style.textContent = css;
  document.head.appendChild(style);
  return true;
}})({})
"#,
        json_arg(css)?
    ))
}
