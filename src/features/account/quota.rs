use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::models::UserAccount;

/// 判断最近一次生成时间是否落在"今天"（参考时区的日历日）。
///
/// 存储里的计数在跨天后并不会立刻清零（懒惰过期）：
/// 时间缺失或早于今天时，有效计数一律视为 0。
pub fn is_fresh_today(last_generation_date: Option<&str>, now: DateTime<Utc>, tz: Tz) -> bool {
    let Some(raw) = last_generation_date else {
        return false;
    };
    let Ok(parsed) = DateTime::parse_from_rfc3339(raw) else {
        // 解析失败按过期处理，等价于从未生成过。
        return false;
    };
    let last_day = parsed.with_timezone(&tz).date_naive();
    let today = now.with_timezone(&tz).date_naive();
    last_day == today
}

/// 今日有效计数：FreshToday 时取存储值，StaleOrNone 时为 0。
pub fn effective_daily_count(user: &UserAccount, now: DateTime<Utc>, tz: Tz) -> i64 {
    if is_fresh_today(user.last_generation_date.as_deref(), now, tz) {
        user.daily_generation_count
    } else {
        0
    }
}

/// 是否允许本次生成。
///
/// 自备密钥用户不限量（短路，不看计数）；其余用户要求今日有效计数
/// 小于每日上限。
pub fn check_allowed(user: &UserAccount, now: DateTime<Utc>, tz: Tz, daily_limit: u32) -> bool {
    if user.has_own_credential {
        return true;
    }
    effective_daily_count(user, now, tz) < i64::from(daily_limit)
}

/// 共享密钥生成成功后应写入的新当日计数。
///
/// StaleOrNone 时发生日切换，计数从 1 重新开始；FreshToday 时在现值上 +1。
pub fn next_daily_count(user: &UserAccount, now: DateTime<Utc>, tz: Tz) -> i64 {
    effective_daily_count(user, now, tz) + 1
}

/// 今日剩余次数；自备密钥用户为 None（不限量）。
pub fn remaining(user: &UserAccount, now: DateTime<Utc>, tz: Tz, daily_limit: u32) -> Option<i64> {
    if user.has_own_credential {
        return None;
    }
    Some((i64::from(daily_limit) - effective_daily_count(user, now, tz)).max(0))
}
