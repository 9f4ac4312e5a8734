use std::collections::VecDeque;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};

/// 速度计算器
pub struct SpeedCalculator {
    /// 历史记录 (时间, 累计字节)
    history: VecDeque<(Instant, u64)>,
    /// 历史窗口大小
    window_size: Duration,
    /// 最大历史记录数
    max_entries: usize,
}

impl SpeedCalculator {
    pub fn new(window_size: Duration) -> Self {
        Self {
            history: VecDeque::new(),
            window_size,
            max_entries: 100,
        }
    }

    /// 添加数据点
    pub fn add_data_point(&mut self, total_bytes: u64) {
        self.add_data_point_at(Instant::now(), total_bytes);
    }

    pub fn add_data_point_at(&mut self, now: Instant, total_bytes: u64) {
        self.history.push_back((now, total_bytes));

        // 移除过期的数据点，至少保留两个
        while self.history.len() > 2 {
            match self.history.front() {
                Some(&(time, _)) if now.duration_since(time) > self.window_size => {
                    self.history.pop_front();
                }
                _ => break,
            }
        }

        while self.history.len() > self.max_entries {
            self.history.pop_front();
        }
    }

    /// 计算当前速度（字节/秒）
    pub fn speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };

        let duration = last.0.duration_since(first.0).as_secs_f64();
        let bytes = last.1.saturating_sub(first.1);

        if duration > 0.0 {
            bytes as f64 / duration
        } else {
            0.0
        }
    }

    /// 估算剩余时间
    pub fn estimate_eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.speed();
        if speed > 0.0 {
            Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
        } else {
            None
        }
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// 格式化时间戳
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_utils() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");

        assert_eq!(format_speed(1024.0), "1.00 KB/s");
        assert_eq!(format_speed(1048576.0), "1.00 MB/s");

        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m 0s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");

        let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(format_timestamp(timestamp), "2024-03-09 14:05:00 UTC");
    }

    #[test]
    fn test_speed_calculator() {
        let mut calculator = SpeedCalculator::new(Duration::from_secs(5));
        assert_eq!(calculator.speed(), 0.0);

        let start = Instant::now();
        calculator.add_data_point_at(start, 0);
        calculator.add_data_point_at(start + Duration::from_secs(2), 2048);
        assert_eq!(calculator.speed(), 1024.0);
        assert_eq!(calculator.estimate_eta(4096), Some(Duration::from_secs(4)));

        // 窗口外的旧点被丢弃
        calculator.add_data_point_at(start + Duration::from_secs(10), 4096);
        calculator.add_data_point_at(start + Duration::from_secs(11), 5120);
        assert_eq!(calculator.speed(), 1024.0);
    }
}
