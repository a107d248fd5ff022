//! Link quality helpers shared by peer ingestion and status output.

/// Map RSSI (dBm) onto 0..=100. -120 dBm and below is 0, -40 dBm and above is 100.
pub fn rssi_to_signal_percent(rssi: i32) -> u8 {
    let pct = (rssi + 120) * 100;
    pct.div_euclid(80).clamp(0, 100) as u8
}

pub fn snr_to_quality(snr: f32) -> &'static str {
    if snr >= 10.0 {
        "Excellent"
    } else if snr >= 5.0 {
        "Good"
    } else if snr >= 0.0 {
        "Fair"
    } else if snr >= -5.0 {
        "Poor"
    } else {
        "Very Poor"
    }
}

pub fn format_snr(snr: Option<f32>) -> String {
    match snr {
        Some(v) => format!("{:.1} dB ({})", v, snr_to_quality(v)),
        None => "--".to_string(),
    }
}

pub fn format_rssi(rssi: Option<i32>) -> String {
    match rssi {
        Some(v) => format!("{} dBm", v),
        None => "--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rssi_scale_is_clamped() {
        assert_eq!(rssi_to_signal_percent(-130), 0);
        assert_eq!(rssi_to_signal_percent(-120), 0);
        assert_eq!(rssi_to_signal_percent(-80), 50);
        assert_eq!(rssi_to_signal_percent(-41), 98);
        assert_eq!(rssi_to_signal_percent(-10), 100);
    }

    #[test]
    fn snr_buckets() {
        assert_eq!(snr_to_quality(12.0), "Excellent");
        assert_eq!(snr_to_quality(5.0), "Good");
        assert_eq!(snr_to_quality(-0.5), "Poor");
        assert_eq!(snr_to_quality(-9.0), "Very Poor");
        assert_eq!(format_snr(Some(7.3)), "7.3 dB (Good)");
        assert_eq!(format_rssi(None), "--");
    }
}
