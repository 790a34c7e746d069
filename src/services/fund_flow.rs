use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;

use crate::models::settings::Settings;
use crate::models::stock::{CapitalFlowSummary, Market};
use crate::utils::encoding::gb18030_to_utf8;
use crate::utils::http::{build_qq_finance_client, build_stock_client, build_xueqiu_client};

const QQ_HK_DYJ_URL: &str = "http://stock.gtimg.cn/data/index.php?appn=hkDyj&action=getDyj";
const EASTMONEY_STOCK_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";
const XUEQIU_FLOW_URL: &str = "https://stock.xueqiu.com/v5/stock/capital/flow.json";

/// 单一市场的资金流抓取策略
pub trait CapitalFlowProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, market: &Market) -> bool;
    /// 返回已格式化的展示文本；无数据也按错误返回
    fn fetch<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// 按市场分发到对应策略，任何失败都折叠为 `Unavailable`
pub struct CapitalFlowFetcher {
    providers: Vec<Box<dyn CapitalFlowProvider>>,
}

impl CapitalFlowFetcher {
    pub fn new(providers: Vec<Box<dyn CapitalFlowProvider>>) -> Self {
        Self { providers }
    }

    /// 港股走腾讯大单、A股走东财融资余额、美股走雪球
    pub fn with_default_providers(settings: &Settings) -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(TencentHkFlow::new()?),
            Box::new(EastmoneyFinancing::new()?),
            Box::new(XueqiuFlow::new(settings.xueqiu_cookie.as_deref())?),
        ]))
    }

    pub async fn fetch_capital_flow(&self, code: &str, market: &Market) -> CapitalFlowSummary {
        let provider = match self.providers.iter().find(|p| p.supports(market)) {
            Some(p) => p,
            None => return CapitalFlowSummary::Unavailable(format!("暂不支持 {} 市场", market)),
        };

        match provider.fetch(code.trim()).await {
            Ok(text) if !text.trim().is_empty() => CapitalFlowSummary::Available(text),
            Ok(_) => CapitalFlowSummary::Unavailable("资金数据为空".to_string()),
            Err(e) => {
                log::warn!("{} 资金流抓取失败 [{}]: {}", code, provider.name(), e);
                CapitalFlowSummary::Unavailable(e.to_string())
            }
        }
    }
}

// ====== 港股：腾讯大单资金 ======

pub struct TencentHkFlow {
    client: reqwest::Client,
    payload_re: Regex,
}

impl TencentHkFlow {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_qq_finance_client()?,
            payload_re: Regex::new(r#"v_hkDyj[^=]*=\s*"([^"]*)""#)?,
        })
    }

    /// 响应体为 GB18030 编码
    pub fn parse_response(&self, status: StatusCode, body: &[u8]) -> Result<String> {
        if !status.is_success() {
            return Err(anyhow!("HTTP {}", status));
        }
        self.parse_payload(&gb18030_to_utf8(body))
    }

    /// 解析 `v_hkDyj="..."`：字段 1 为主力净流入，字段 7 为成交额（单位万）
    pub fn parse_payload(&self, text: &str) -> Result<String> {
        if !text.contains("v_hkDyj") {
            return Err(anyhow!("资金数据为空"));
        }
        let payload = self
            .payload_re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(text);

        let parts: Vec<&str> = payload.split('~').map(|p| p.trim()).collect();
        let net = parts.get(1).copied().unwrap_or("");
        let turnover = parts.get(7).copied().unwrap_or("");
        if net.is_empty() {
            return Err(anyhow!("资金数据为空"));
        }
        if turnover.is_empty() {
            Ok(format!("主力净流入：{} 万港币", net))
        } else {
            Ok(format!("主力净流入：{} 万港币｜成交额：{} 万", net, turnover))
        }
    }
}

/// 腾讯接口使用不带后缀、5 位补零的港股代码
pub fn hk_base_code(code: &str) -> String {
    let upper = code.trim().to_uppercase();
    let base = upper.strip_suffix(".HK").unwrap_or(&upper);
    if !base.is_empty() && base.len() < 5 && base.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", base)
    } else {
        base.to_string()
    }
}

impl CapitalFlowProvider for TencentHkFlow {
    fn name(&self) -> &'static str {
        "tencent-hk"
    }

    fn supports(&self, market: &Market) -> bool {
        *market == Market::HK
    }

    fn fetch<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let base = hk_base_code(code);
            let url = format!("{}&c={}", QQ_HK_DYJ_URL, urlencoding::encode(&base));
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let bytes = resp.bytes().await?;
            self.parse_response(status, &bytes)
        })
    }
}

// ====== A股：东方财富融资余额 ======

pub struct EastmoneyFinancing {
    client: reqwest::Client,
}

impl EastmoneyFinancing {
    pub fn new() -> Result<Self> {
        Ok(Self { client: build_stock_client()? })
    }
}

pub fn code_to_pure(code: &str) -> String {
    code.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 6 开头沪市(1.)，0/3 开头深市(0.)，其余不支持
pub fn code_to_secid(code: &str) -> Option<String> {
    let digits = code_to_pure(code);
    match digits.chars().next() {
        Some('6') => Some(format!("1.{}", digits)),
        Some('0') | Some('3') => Some(format!("0.{}", digits)),
        _ => None,
    }
}

pub fn parse_eastmoney_financing(json: &Value) -> Result<String> {
    let rzye = json
        .get("data")
        .filter(|d| !d.is_null())
        .and_then(|d| d.get("rzye"))
        .ok_or_else(|| anyhow!("主力资金数据暂缺"))?;

    let text = match rzye {
        Value::Number(n) if n.as_f64().map_or(false, |v| v != 0.0) => n.to_string(),
        Value::String(s) if !s.trim().is_empty() && s.trim() != "-" => s.trim().to_string(),
        _ => return Err(anyhow!("主力资金数据暂缺")),
    };
    Ok(format!("融资余额: {} 万元", text))
}

pub fn parse_eastmoney_response(status: StatusCode, text: &str) -> Result<String> {
    if !status.is_success() {
        return Err(anyhow!("HTTP {}", status));
    }
    let json: Value = serde_json::from_str(text).map_err(|e| anyhow!("东方财富数据解析失败: {}", e))?;
    parse_eastmoney_financing(&json)
}

impl CapitalFlowProvider for EastmoneyFinancing {
    fn name(&self) -> &'static str {
        "eastmoney-rzye"
    }

    fn supports(&self, market: &Market) -> bool {
        *market == Market::CN
    }

    fn fetch<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let secid = code_to_secid(code).ok_or_else(|| anyhow!("暂不支持代码 {}", code))?;
            let url = format!("{}?secid={}", EASTMONEY_STOCK_URL, secid);
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            parse_eastmoney_response(status, &text)
        })
    }
}

// ====== 美股：雪球资金流 ======

pub struct XueqiuFlow {
    client: reqwest::Client,
}

impl XueqiuFlow {
    pub fn new(cookie: Option<&str>) -> Result<Self> {
        Ok(Self { client: build_xueqiu_client(cookie)? })
    }
}

/// `data.net_amount_main` 单位为元，展示为万元
pub fn parse_xueqiu_flow(json: &Value) -> Result<String> {
    let net = json
        .get("data")
        .and_then(|d| d.get("net_amount_main"))
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .ok_or_else(|| anyhow!("主力数据暂缺"))?;
    Ok(format!("主力净流入 {:.2} 万元", net / 1e4))
}

pub fn parse_xueqiu_response(status: StatusCode, text: &str) -> Result<String> {
    if !status.is_success() {
        return Err(anyhow!("主力数据获取失败 HTTP {}", status));
    }
    let json: Value = serde_json::from_str(text).map_err(|e| anyhow!("雪球数据解析失败: {}", e))?;
    parse_xueqiu_flow(&json)
}

impl CapitalFlowProvider for XueqiuFlow {
    fn name(&self) -> &'static str {
        "xueqiu"
    }

    fn supports(&self, market: &Market) -> bool {
        *market == Market::US
    }

    fn fetch<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = format!("{}?symbol={}&period=1d", XUEQIU_FLOW_URL, urlencoding::encode(code));
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            parse_xueqiu_response(status, &text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticProvider {
        market: Market,
        reply: std::result::Result<String, String>,
    }

    impl CapitalFlowProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        fn supports(&self, market: &Market) -> bool {
            *market == self.market
        }

        fn fetch<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move { self.reply.clone().map_err(|e| anyhow!(e)) })
        }
    }

    #[test]
    fn test_parse_hk_payload() {
        let flow = TencentHkFlow::new().unwrap();
        let text = r#"v_hkDyj="00700~-12345.6~a~b~c~d~e~98765.4~";"#;
        assert_eq!(
            flow.parse_payload(text).unwrap(),
            "主力净流入：-12345.6 万港币｜成交额：98765.4 万"
        );
    }

    #[test]
    fn test_parse_hk_payload_empty_or_garbage() {
        let flow = TencentHkFlow::new().unwrap();
        assert!(flow.parse_payload("").is_err());
        assert!(flow.parse_payload("<html>502 Bad Gateway</html>").is_err());
        assert!(flow.parse_payload(r#"v_hkDyj="";"#).is_err());
        assert_eq!(
            flow.parse_payload(r#"v_hkDyj="00700~88.1";"#).unwrap(),
            "主力净流入：88.1 万港币"
        );
    }

    #[test]
    fn test_hk_base_code() {
        assert_eq!(hk_base_code("00700.HK"), "00700");
        assert_eq!(hk_base_code(" 9988.hk"), "09988");
        assert_eq!(hk_base_code("0005"), "00005");
        assert_eq!(hk_base_code("HSTECH"), "HSTECH");
    }

    #[test]
    fn test_code_to_secid() {
        assert_eq!(code_to_secid("600519").as_deref(), Some("1.600519"));
        assert_eq!(code_to_secid("sz000001").as_deref(), Some("0.000001"));
        assert_eq!(code_to_secid("300750").as_deref(), Some("0.300750"));
        assert_eq!(code_to_secid("830799"), None);
        assert_eq!(code_to_secid("AAPL"), None);
    }

    #[test]
    fn test_parse_eastmoney_financing() {
        let ok = json!({"rc": 0, "data": {"f57": "600519", "rzye": 1523456.78}});
        assert_eq!(parse_eastmoney_financing(&ok).unwrap(), "融资余额: 1523456.78 万元");

        assert!(parse_eastmoney_financing(&json!({"data": null})).is_err());
        assert!(parse_eastmoney_financing(&json!({"data": {"rzye": 0}})).is_err());
        assert!(parse_eastmoney_financing(&json!({"data": {"rzye": "-"}})).is_err());
        assert!(parse_eastmoney_financing(&json!([])).is_err());
    }

    #[test]
    fn test_parse_xueqiu_flow() {
        let ok = json!({"data": {"net_amount_main": 123456789.0}, "error_code": 0});
        assert_eq!(parse_xueqiu_flow(&ok).unwrap(), "主力净流入 12345.68 万元");
        assert!(parse_xueqiu_flow(&json!({"data": {}})).is_err());
        assert!(parse_xueqiu_flow(&json!({"error_description": "遇到错误"})).is_err());
    }

    /// 把固定的 HTTP 状态码和响应体交给真实的响应解析函数
    struct RawResponseProvider {
        market: Market,
        status: StatusCode,
        body: &'static str,
    }

    impl CapitalFlowProvider for RawResponseProvider {
        fn name(&self) -> &'static str {
            "raw"
        }

        fn supports(&self, market: &Market) -> bool {
            *market == self.market
        }

        fn fetch<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                match self.market {
                    Market::CN => parse_eastmoney_response(self.status, self.body),
                    _ => parse_xueqiu_response(self.status, self.body),
                }
            })
        }
    }

    #[test]
    fn test_responses_reject_bad_status_and_bodies() {
        let ok = StatusCode::OK;
        let bad = StatusCode::SERVICE_UNAVAILABLE;
        for body in ["", "   ", "<html>400 Bad Request</html>", "{\"data\":", "null"] {
            assert!(parse_xueqiu_response(ok, body).is_err(), "xueqiu body {:?}", body);
            assert!(parse_eastmoney_response(ok, body).is_err(), "eastmoney body {:?}", body);
        }
        assert!(parse_xueqiu_response(bad, r#"{"data":{"net_amount_main":1.0}}"#).is_err());
        assert!(parse_eastmoney_response(bad, r#"{"data":{"rzye":1.0}}"#).is_err());

        assert_eq!(
            parse_xueqiu_response(ok, r#"{"data":{"net_amount_main":-25000.0},"error_code":0}"#).unwrap(),
            "主力净流入 -2.50 万元"
        );

        let flow = TencentHkFlow::new().unwrap();
        assert!(flow.parse_response(bad, br#"v_hkDyj="00700~1.0";"#).is_err());
        assert!(flow.parse_response(ok, b"").is_err());
        assert!(flow.parse_response(ok, br#"v_hkDyj="00700~1.0";"#).is_ok());
    }

    #[tokio::test]
    async fn test_fetcher_folds_raw_failures() {
        let fetcher = CapitalFlowFetcher::new(vec![
            Box::new(RawResponseProvider { market: Market::US, status: StatusCode::OK, body: "<html>captcha</html>" }),
            Box::new(RawResponseProvider { market: Market::CN, status: StatusCode::BAD_GATEWAY, body: "" }),
        ]);
        assert!(!fetcher.fetch_capital_flow("AAPL", &Market::US).await.is_available());
        match fetcher.fetch_capital_flow("600519", &Market::CN).await {
            CapitalFlowSummary::Unavailable(reason) => assert!(reason.contains("502")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetcher_dispatches_by_market() {
        let fetcher = CapitalFlowFetcher::new(vec![
            Box::new(StaticProvider { market: Market::HK, reply: Ok("hk flow".into()) }),
            Box::new(StaticProvider { market: Market::US, reply: Ok("us flow".into()) }),
        ]);
        assert_eq!(
            fetcher.fetch_capital_flow("AAPL", &Market::US).await,
            CapitalFlowSummary::Available("us flow".into())
        );
        assert_eq!(
            fetcher.fetch_capital_flow("0700", &Market::HK).await,
            CapitalFlowSummary::Available("hk flow".into())
        );
    }

    #[tokio::test]
    async fn test_fetcher_never_fails() {
        let fetcher = CapitalFlowFetcher::new(vec![
            Box::new(StaticProvider { market: Market::US, reply: Err("HTTP 503".into()) }),
            Box::new(StaticProvider { market: Market::HK, reply: Ok("   ".into()) }),
        ]);

        match fetcher.fetch_capital_flow("ZZZZ", &Market::US).await {
            CapitalFlowSummary::Unavailable(reason) => assert!(reason.contains("503")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!fetcher.fetch_capital_flow("0700", &Market::HK).await.is_available());

        match fetcher.fetch_capital_flow("7203", &Market::Other("JP".into())).await {
            CapitalFlowSummary::Unavailable(reason) => assert!(reason.contains("JP")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
