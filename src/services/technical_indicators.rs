/// 生成技术面点评所需的最少收盘价数量
pub const MIN_HISTORY: usize = 20;

/// 点评 prompt 中使用的指标快照
#[derive(Debug, Clone, PartialEq)]
pub struct TrendIndicators {
    pub current: f64,
    pub ma5: f64,
    pub ma20: f64,
    /// 最近 3 日 MACD 柱（DIF - DEA），已保留两位小数
    pub macd_hist_recent: Vec<f64>,
}

/// 计算均线 + MACD 指标快照；收盘价不足 20 个或出现非有限值时返回 None
pub fn compute_trend(closes: &[f64]) -> Option<TrendIndicators> {
    if closes.len() < MIN_HISTORY {
        return None;
    }

    let ma5 = calc_ma(closes, 5);
    let ma20 = calc_ma(closes, 20);
    let (_, _, hist) = calc_macd(closes, 12, 26, 9);

    let current = *closes.last()?;
    let ma5 = (*ma5.last()?)?;
    let ma20 = (*ma20.last()?)?;
    let macd_hist_recent: Vec<f64> = hist[hist.len().saturating_sub(3)..]
        .iter()
        .map(|v| round2(*v))
        .collect();

    let all_finite = [current, ma5, ma20].iter().all(|v| v.is_finite())
        && macd_hist_recent.iter().all(|v| v.is_finite());
    if !all_finite {
        return None;
    }

    Some(TrendIndicators {
        current,
        ma5,
        ma20,
        macd_hist_recent,
    })
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ====== 指标计算函数 ======

fn calc_ma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period { return result; }

    let mut sum: f64 = data[..period].iter().sum();
    result[period - 1] = Some(sum / period as f64);

    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result[i] = Some(sum / period as f64);
    }
    result
}

/// 以 span 计的 EMA，α = 2/(span+1)。
/// 采用带偏差修正的权重形式：ema_t = Σ(1-α)^i·x_{t-i} / Σ(1-α)^i，
/// 序列起始阶段不会被首个值过度拉扯。
fn calc_ema(data: &[f64], span: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(data.len());
    if span == 0 { return result; }

    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for &x in data {
        weighted_sum = x + decay * weighted_sum;
        weight_total = 1.0 + decay * weight_total;
        result.push(weighted_sum / weight_total);
    }
    result
}

/// 返回 (DIF, DEA, 柱)，柱 = DIF - DEA
fn calc_macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let ema_fast = calc_ema(data, fast);
    let ema_slow = calc_ema(data, slow);

    let dif: Vec<f64> = ema_fast.iter().zip(ema_slow.iter()).map(|(f, s)| f - s).collect();
    let dea = calc_ema(&dif, signal);
    let hist: Vec<f64> = dif.iter().zip(dea.iter()).map(|(d, e)| d - e).collect();

    (dif, dea, hist)
}
