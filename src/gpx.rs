//! GPX 1.1 export of a stored session.
//!
//! Only the point sequence is exported: one track with one segment, a `trkpt`
//! per stored sample with its timestamp and horizontal accuracy. Events and
//! statistics are not part of the GPX document.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::TrackingError;
use crate::TrackingSession;

const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
const CREATOR: &str = "route-tracker";

/// Serialize `session` as a GPX 1.1 document.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use route_tracker::gpx::export_gpx;
/// use route_tracker::{LocationSample, TrackingSession};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let mut session = TrackingSession::new("s-1", "agent-7", t, t);
/// session.points.push(LocationSample::new(-0.18, -78.46, t).with_accuracy(8.0));
///
/// let xml = export_gpx(&session, t).unwrap();
/// assert!(xml.contains(r#"<trkpt lat="-0.18" lon="-78.46">"#));
/// assert!(xml.contains("<accuracy>8</accuracy>"));
/// ```
pub fn export_gpx(session: &TrackingSession, generated_at: DateTime<Utc>) -> Result<String, TrackingError> {
    let mut w = GpxWriter::new();

    w.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("gpx");
    root.push_attribute(("version", "1.1"));
    root.push_attribute(("creator", CREATOR));
    root.push_attribute(("xmlns", GPX_NAMESPACE));
    w.event(Event::Start(root))?;

    w.open("metadata")?;
    w.text_element("name", &format!("Ruta {}", session.session_id))?;
    w.text_element("time", &rfc3339(generated_at))?;
    w.close("metadata")?;

    w.open("trk")?;
    w.text_element("name", &session.session_id)?;
    w.open("trkseg")?;

    for point in &session.points {
        let lat = point.latitude.to_string();
        let lon = point.longitude.to_string();
        let mut trkpt = BytesStart::new("trkpt");
        trkpt.push_attribute(("lat", lat.as_str()));
        trkpt.push_attribute(("lon", lon.as_str()));
        w.event(Event::Start(trkpt))?;

        w.text_element("time", &rfc3339(point.timestamp))?;
        w.open("extensions")?;
        w.text_element("accuracy", &point.accuracy.to_string())?;
        w.close("extensions")?;

        w.close("trkpt")?;
    }

    w.close("trkseg")?;
    w.close("trk")?;
    w.close("gpx")?;

    w.finish()
}

/// Download name for a session export: `ruta_<sessionId>_<YYYY-MM-DD>.gpx`.
pub fn gpx_file_name(session: &TrackingSession, date: NaiveDate) -> String {
    format!("ruta_{}_{}.gpx", session.session_id, date.format("%Y-%m-%d"))
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Thin wrapper mapping writer failures to [`TrackingError::Export`].
struct GpxWriter {
    inner: Writer<Vec<u8>>,
}

impl GpxWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), TrackingError> {
        self.inner
            .write_event(event)
            .map_err(|e| TrackingError::Export(e.to_string()))
    }

    fn open(&mut self, name: &str) -> Result<(), TrackingError> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn close(&mut self, name: &str) -> Result<(), TrackingError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), TrackingError> {
        self.open(name)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String, TrackingError> {
        String::from_utf8(self.inner.into_inner()).map_err(|e| TrackingError::Export(e.to_string()))
    }
}
