use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::QuotaConfig;

use super::storage::UserStore;

/// 解析 "HH:MM" 形式的清零时间。
pub fn parse_reset_time(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// 参考时区内下一次到达 hour:minute 的时刻（严格晚于 now）。
///
/// DST 跳变导致当天该时刻不存在时顺延到下一天。
fn next_occurrence(now: DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    for add in 0..3u64 {
        let Some(date) = now.date_naive().checked_add_days(Days::new(add)) else {
            continue;
        };
        if let Some(naive) = date.and_hms_opt(hour, minute, 0)
            && let Some(candidate) = tz.from_local_datetime(&naive).earliest()
            && candidate > now
        {
            return candidate;
        }
    }
    now + chrono::Duration::days(1)
}

/// 每日额度清零任务。
///
/// 固定在参考时区的 `quota.reset_time` 触发一次批量清零，
/// 只作用于没有自备密钥的用户；与请求路径的读写交错是可接受的——
/// 清零覆盖的值在新的一天里本来就会被有效计数判定视为过期。
pub async fn run_daily_quota_reset(store: Arc<UserStore>, cfg: QuotaConfig) {
    let tz: Tz = cfg.timezone.parse().unwrap_or(chrono_tz::Asia::Shanghai);
    let (hour, minute) = parse_reset_time(&cfg.reset_time).unwrap_or((0, 0));

    loop {
        let now = Utc::now().with_timezone(&tz);
        let next = next_occurrence(now, hour, minute);
        let sleep_dur = (next - now).to_std().unwrap_or(Duration::from_secs(60));
        tracing::info!("额度清零任务：将在 {} 触发", next);
        tokio::time::sleep(sleep_dur).await;

        let now_rfc3339 = Utc::now().to_rfc3339();
        match store.reset_daily_counters(&now_rfc3339).await {
            Ok(rows) => tracing::info!("额度清零完成: affected_users={}", rows),
            Err(e) => tracing::warn!("额度清零失败: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{next_occurrence, parse_reset_time};
    use chrono::{TimeZone, Timelike};
    use chrono_tz::Tz;

    const TZ: Tz = chrono_tz::Asia::Shanghai;

    #[test]
    fn parse_reset_time_accepts_valid_values() {
        assert_eq!(parse_reset_time("00:00"), Some((0, 0)));
        assert_eq!(parse_reset_time(" 3:30 "), Some((3, 30)));
        assert_eq!(parse_reset_time("23:59"), Some((23, 59)));
    }

    #[test]
    fn parse_reset_time_rejects_garbage() {
        assert_eq!(parse_reset_time("24:00"), None);
        assert_eq!(parse_reset_time("12:60"), None);
        assert_eq!(parse_reset_time("noon"), None);
        assert_eq!(parse_reset_time(""), None);
    }

    #[test]
    fn next_occurrence_later_today_when_still_ahead() {
        let now = TZ.with_ymd_and_hms(2025, 6, 1, 1, 30, 0).unwrap();
        let next = next_occurrence(now, 3, 0);
        assert_eq!(next.date_naive(), now.date_naive());
        assert_eq!((next.hour(), next.minute()), (3, 0));
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow_when_passed() {
        let now = TZ.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let next = next_occurrence(now, 3, 0);
        // 严格晚于 now：正好踩在清零时刻上时取次日。
        assert_eq!(
            next.date_naive(),
            now.date_naive().succ_opt().expect("next day")
        );
    }
}
