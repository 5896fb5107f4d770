/// A report card in the side panel. Sample data until live reports exist.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheReportView {
    pub code: &'static str,
    pub kind: &'static str,
    pub status: &'static str,
    pub coordinates: &'static str,
    pub age_label: &'static str,
}

/// Decorative marker on the map placeholder, positioned in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct MapMarkerView {
    pub top_pct: u8,
    pub left_pct: u8,
    pub tone: &'static str,
    pub pulsing: bool,
}

pub struct DashboardView {
    pub center_label: &'static str,
    pub scale_label: &'static str,
    pub reports: Vec<CacheReportView>,
    pub markers: Vec<MapMarkerView>,
}

pub fn load_dashboard_view() -> DashboardView {
    DashboardView {
        center_label: "LAT: 50.9503° N • LON: 1.8587° E",
        scale_label: "SCALE: 1:50,000",
        reports: vec![CacheReportView {
            code: "CACHE #A-2431",
            kind: "Boat hull",
            status: "Validated",
            coordinates: "50.9213°N, 1.8702°E",
            age_label: "2d ago",
        }],
        markers: vec![
            MapMarkerView {
                top_pct: 50,
                left_pct: 33,
                tone: "magenta",
                pulsing: true,
            },
            MapMarkerView {
                top_pct: 66,
                left_pct: 75,
                tone: "lime",
                pulsing: false,
            },
        ],
    }
}
