//! Built-in geometry functions registered on SQLite connections.
//!
//! Geometries are stored as JSON text holding an SRID and a GeoJSON geometry:
//!
//! ```json
//! {"srid":4326,"geometry":{"type":"Point","coordinates":[36.8172,-1.2864]}}
//! ```
//!
//! The function names and argument orders follow SpatiaLite so the same SQL
//! runs against either backend. Predicates use the DE-9IM relation, so a
//! point on a polygon boundary is not contained by it but does intersect it.
//! Distances are planar, in the units of the geometry's reference system.
//! Any `NULL` argument yields `NULL`, as does comparing geometries with
//! different SRIDs.

use std::ffi::c_int;
use std::panic::UnwindSafe;

use geo::{
    Closest, ClosestPoint, Coord, CoordsIter, Geometry, GeometryCollection, Intersects,
    LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect, Relate,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{ToSql, ValueRef};
use rusqlite::Connection;
use serde_json::{Value, json};
use thiserror::Error;

/// Version string reported by `spatialite_version()` on the built-in engine.
pub const BUILTIN_ENGINE_VERSION: &str = concat!("lokeshen-geo ", env!("CARGO_PKG_VERSION"));

/// SRID assumed for GeoJSON input without an explicit one.
pub const GEOJSON_DEFAULT_SRID: i32 = 4326;

/// Errors raised while decoding geometries.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The text was not JSON.
    #[error("geometry text is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// The stored value lacked an integer `srid`.
    #[error("stored geometry has no integer srid")]
    MissingSrid,
    /// A GeoJSON object lacked its `type` member.
    #[error("GeoJSON object has no type")]
    MissingType,
    /// The GeoJSON type is not a geometry this engine understands.
    #[error("unsupported GeoJSON type {kind:?}")]
    UnsupportedType {
        /// Offending `type` member.
        kind: String,
    },
    /// Coordinates were missing or malformed.
    #[error("malformed coordinates for {kind}")]
    InvalidCoordinates {
        /// Geometry type being decoded.
        kind: &'static str,
    },
    /// Binary SpatiaLite geometries need the extension backend.
    #[error("binary geometries are not supported by the built-in engine")]
    BinaryGeometry,
    /// The argument was not a geometry at all.
    #[error("expected a geometry, found a {found} value")]
    NotAGeometry {
        /// SQLite storage class of the argument.
        found: &'static str,
    },
}

/// A geometry tagged with its spatial reference system.
///
/// # Examples
///
/// ```
/// use geo::{Geometry, Point};
/// use lokeshen_core::StoredGeometry;
///
/// let stored = StoredGeometry::new(4326, Geometry::Point(Point::new(36.8, -1.3)));
/// let text = stored.encode();
/// assert_eq!(StoredGeometry::decode(&text).unwrap(), stored);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoredGeometry {
    /// Spatial reference system identifier.
    pub srid: i32,
    /// The geometry itself.
    pub geometry: Geometry<f64>,
}

impl StoredGeometry {
    /// Tag `geometry` with `srid`.
    #[must_use]
    pub const fn new(srid: i32, geometry: Geometry<f64>) -> Self {
        Self { srid, geometry }
    }

    /// Parse a GeoJSON geometry or feature.
    pub fn from_geojson(text: &str, srid: i32) -> Result<Self, GeometryError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::new(srid, parse_geojson(&value)?))
    }

    /// Render the geometry as GeoJSON, without the SRID.
    #[must_use]
    pub fn to_geojson(&self) -> Value {
        geojson_value(&self.geometry)
    }

    /// Encode as stored column text.
    #[must_use]
    pub fn encode(&self) -> String {
        json!({ "srid": self.srid, "geometry": self.to_geojson() }).to_string()
    }

    /// Decode stored column text.
    pub fn decode(text: &str) -> Result<Self, GeometryError> {
        let value: Value = serde_json::from_str(text)?;
        let srid = value
            .get("srid")
            .and_then(Value::as_i64)
            .and_then(|srid| i32::try_from(srid).ok())
            .ok_or(GeometryError::MissingSrid)?;
        let geometry = value.get("geometry").ok_or(GeometryError::MissingType)?;
        Ok(Self::new(srid, parse_geojson(geometry)?))
    }

    /// SpatiaLite-style type name such as `POINT` or `MULTIPOLYGON`.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match &self.geometry {
            Geometry::Point(_) => "POINT",
            Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "POLYGON",
            Geometry::MultiPoint(_) => "MULTIPOINT",
            Geometry::MultiLineString(_) => "MULTILINESTRING",
            Geometry::MultiPolygon(_) => "MULTIPOLYGON",
            Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        }
    }

    /// Whether `self` contains `other` (boundary excluded).
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.geometry.relate(&other.geometry).is_contains()
    }

    /// Whether the geometries share any point.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.geometry.intersects(&other.geometry)
    }

    /// Minimum planar distance between the geometries.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        if self.intersects(other) {
            return 0.0;
        }
        let towards = |from: &Geometry<f64>, to: &Geometry<f64>| {
            from.coords_iter()
                .map(|coord| point_distance(to, Point::from(coord)))
                .fold(f64::INFINITY, f64::min)
        };
        towards(&self.geometry, &other.geometry).min(towards(&other.geometry, &self.geometry))
    }
}

fn point_distance(geometry: &Geometry<f64>, point: Point<f64>) -> f64 {
    match geometry.closest_point(&point) {
        Closest::Intersection(_) => 0.0,
        Closest::SinglePoint(closest) => (closest.x() - point.x()).hypot(closest.y() - point.y()),
        Closest::Indeterminate => f64::INFINITY,
    }
}

fn parse_geojson(value: &Value) -> Result<Geometry<f64>, GeometryError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeometryError::MissingType)?;
    match kind {
        "Feature" => parse_geojson(value.get("geometry").ok_or(GeometryError::MissingType)?),
        "GeometryCollection" => {
            let items = value
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or(GeometryError::InvalidCoordinates {
                    kind: "GeometryCollection",
                })?;
            let geometries = items
                .iter()
                .map(parse_geojson)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::GeometryCollection(GeometryCollection(geometries)))
        }
        "Point" => Ok(Geometry::Point(position(coordinates(value, "Point")?, "Point")?.into())),
        "LineString" => Ok(Geometry::LineString(line(
            coordinates(value, "LineString")?,
            "LineString",
        )?)),
        "Polygon" => Ok(Geometry::Polygon(polygon(
            coordinates(value, "Polygon")?,
            "Polygon",
        )?)),
        "MultiPoint" => {
            let points = members(coordinates(value, "MultiPoint")?, "MultiPoint")?
                .iter()
                .map(|item| position(item, "MultiPoint").map(Point::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiPoint(MultiPoint(points)))
        }
        "MultiLineString" => {
            let lines = members(coordinates(value, "MultiLineString")?, "MultiLineString")?
                .iter()
                .map(|item| line(item, "MultiLineString"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiLineString(MultiLineString(lines)))
        }
        "MultiPolygon" => {
            let polygons = members(coordinates(value, "MultiPolygon")?, "MultiPolygon")?
                .iter()
                .map(|item| polygon(item, "MultiPolygon"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
        }
        other => Err(GeometryError::UnsupportedType {
            kind: other.to_owned(),
        }),
    }
}

fn coordinates<'v>(value: &'v Value, kind: &'static str) -> Result<&'v Value, GeometryError> {
    value
        .get("coordinates")
        .ok_or(GeometryError::InvalidCoordinates { kind })
}

fn members<'v>(value: &'v Value, kind: &'static str) -> Result<&'v [Value], GeometryError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or(GeometryError::InvalidCoordinates { kind })
}

fn position(value: &Value, kind: &'static str) -> Result<Coord<f64>, GeometryError> {
    match members(value, kind)? {
        [x, y, ..] => {
            let x = x.as_f64().ok_or(GeometryError::InvalidCoordinates { kind })?;
            let y = y.as_f64().ok_or(GeometryError::InvalidCoordinates { kind })?;
            Ok(Coord { x, y })
        }
        _ => Err(GeometryError::InvalidCoordinates { kind }),
    }
}

fn line(value: &Value, kind: &'static str) -> Result<LineString<f64>, GeometryError> {
    members(value, kind)?
        .iter()
        .map(|item| position(item, kind))
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn polygon(value: &Value, kind: &'static str) -> Result<Polygon<f64>, GeometryError> {
    let mut rings = members(value, kind)?.iter().map(|ring| line(ring, kind));
    let exterior = rings
        .next()
        .ok_or(GeometryError::InvalidCoordinates { kind })??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn coord_value(coord: Coord<f64>) -> Value {
    json!([coord.x, coord.y])
}

fn line_value(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().copied().map(coord_value).collect())
}

fn polygon_value(polygon: &Polygon<f64>) -> Value {
    Value::Array(
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(line_value)
            .collect(),
    )
}

fn rect_polygon(rect: &Rect<f64>) -> Value {
    json!({ "type": "Polygon", "coordinates": polygon_value(&rect.to_polygon()) })
}

fn geojson_value(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(point) => json!({ "type": "Point", "coordinates": coord_value(point.0) }),
        Geometry::Line(segment) => json!({
            "type": "LineString",
            "coordinates": [coord_value(segment.start), coord_value(segment.end)],
        }),
        Geometry::LineString(line) => json!({ "type": "LineString", "coordinates": line_value(line) }),
        Geometry::Polygon(polygon) => {
            json!({ "type": "Polygon", "coordinates": polygon_value(polygon) })
        }
        Geometry::MultiPoint(points) => json!({
            "type": "MultiPoint",
            "coordinates": points.iter().map(|point| coord_value(point.0)).collect::<Vec<_>>(),
        }),
        Geometry::MultiLineString(lines) => json!({
            "type": "MultiLineString",
            "coordinates": lines.iter().map(line_value).collect::<Vec<_>>(),
        }),
        Geometry::MultiPolygon(polygons) => json!({
            "type": "MultiPolygon",
            "coordinates": polygons.iter().map(polygon_value).collect::<Vec<_>>(),
        }),
        Geometry::GeometryCollection(collection) => json!({
            "type": "GeometryCollection",
            "geometries": collection.iter().map(geojson_value).collect::<Vec<_>>(),
        }),
        Geometry::Rect(rect) => rect_polygon(rect),
        Geometry::Triangle(triangle) => {
            json!({ "type": "Polygon", "coordinates": polygon_value(&triangle.to_polygon()) })
        }
    }
}

/// Register every built-in function on `connection`.
pub(crate) fn register_functions(connection: &Connection) -> rusqlite::Result<()> {
    register(connection, &["spatialite_version"], &[0], |_| {
        Ok(BUILTIN_ENGINE_VERSION)
    })?;
    register(connection, &["MakePoint"], &[2, 3], make_point)?;
    register(connection, &["BuildMbr"], &[4, 5], build_mbr)?;
    register(connection, &["GeomFromGeoJSON"], &[1, 2], geom_from_geojson)?;
    register(connection, &["AsGeoJSON"], &[1], as_geojson)?;
    register(connection, &["ST_X", "X"], &[1], st_x)?;
    register(connection, &["ST_Y", "Y"], &[1], st_y)?;
    register(connection, &["SRID", "ST_SRID"], &[1], srid)?;
    register(connection, &["GeometryType", "ST_GeometryType"], &[1], geometry_type)?;
    register(connection, &["ST_Contains", "Contains"], &[2], st_contains)?;
    register(connection, &["ST_Within", "Within"], &[2], st_within)?;
    register(connection, &["ST_Intersects", "Intersects"], &[2], st_intersects)?;
    register(connection, &["ST_Distance", "Distance"], &[2], st_distance)?;
    register(connection, &["PtDistWithin"], &[3], pt_dist_within)?;
    Ok(())
}

fn register<T, F>(
    connection: &Connection,
    names: &[&str],
    arities: &[c_int],
    function: F,
) -> rusqlite::Result<()>
where
    T: ToSql,
    F: Fn(&Context<'_>) -> rusqlite::Result<T> + Copy + Send + UnwindSafe + 'static,
{
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    for name in names {
        for &arity in arities {
            connection.create_scalar_function(*name, arity, flags, function)?;
        }
    }
    Ok(())
}

fn user_error(err: GeometryError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}

fn geometry_arg(ctx: &Context<'_>, index: usize) -> rusqlite::Result<Option<StoredGeometry>> {
    match ctx.get_raw(index) {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(rusqlite::Error::Utf8Error)?;
            StoredGeometry::decode(text).map(Some).map_err(user_error)
        }
        ValueRef::Blob(_) => Err(user_error(GeometryError::BinaryGeometry)),
        ValueRef::Integer(_) => Err(user_error(GeometryError::NotAGeometry { found: "integer" })),
        ValueRef::Real(_) => Err(user_error(GeometryError::NotAGeometry { found: "real" })),
    }
}

fn number_arg(ctx: &Context<'_>, index: usize) -> rusqlite::Result<Option<f64>> {
    ctx.get::<Option<f64>>(index)
}

fn srid_arg(ctx: &Context<'_>, index: usize, default: i32) -> rusqlite::Result<Option<i32>> {
    if index < ctx.len() {
        ctx.get::<Option<i32>>(index)
    } else {
        Ok(Some(default))
    }
}

fn geometry_pair(
    ctx: &Context<'_>,
) -> rusqlite::Result<Option<(StoredGeometry, StoredGeometry)>> {
    let (Some(left), Some(right)) = (geometry_arg(ctx, 0)?, geometry_arg(ctx, 1)?) else {
        return Ok(None);
    };
    if left.srid != right.srid {
        return Ok(None);
    }
    Ok(Some((left, right)))
}

fn make_point(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let (Some(x), Some(y), Some(srid)) =
        (number_arg(ctx, 0)?, number_arg(ctx, 1)?, srid_arg(ctx, 2, 0)?)
    else {
        return Ok(None);
    };
    Ok(Some(
        StoredGeometry::new(srid, Geometry::Point(Point::new(x, y))).encode(),
    ))
}

fn build_mbr(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let (Some(x1), Some(y1), Some(x2), Some(y2), Some(srid)) = (
        number_arg(ctx, 0)?,
        number_arg(ctx, 1)?,
        number_arg(ctx, 2)?,
        number_arg(ctx, 3)?,
        srid_arg(ctx, 4, 0)?,
    ) else {
        return Ok(None);
    };
    let rect = Rect::new(Coord { x: x1, y: y1 }, Coord { x: x2, y: y2 });
    Ok(Some(
        StoredGeometry::new(srid, Geometry::Polygon(rect.to_polygon())).encode(),
    ))
}

fn geom_from_geojson(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let (Some(text), Some(srid)) = (
        ctx.get::<Option<String>>(0)?,
        srid_arg(ctx, 1, GEOJSON_DEFAULT_SRID)?,
    ) else {
        return Ok(None);
    };
    StoredGeometry::from_geojson(&text, srid)
        .map(|geometry| Some(geometry.encode()))
        .map_err(user_error)
}

fn as_geojson(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(geometry_arg(ctx, 0)?.map(|geometry| geometry.to_geojson().to_string()))
}

fn as_point(geometry: Option<StoredGeometry>) -> Option<Point<f64>> {
    match geometry?.geometry {
        Geometry::Point(point) => Some(point),
        _ => None,
    }
}

fn st_x(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(as_point(geometry_arg(ctx, 0)?).map(|point| point.x()))
}

fn st_y(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(as_point(geometry_arg(ctx, 0)?).map(|point| point.y()))
}

fn srid(ctx: &Context<'_>) -> rusqlite::Result<Option<i32>> {
    Ok(geometry_arg(ctx, 0)?.map(|geometry| geometry.srid))
}

fn geometry_type(ctx: &Context<'_>) -> rusqlite::Result<Option<&'static str>> {
    Ok(geometry_arg(ctx, 0)?.map(|geometry| geometry.type_name()))
}

fn st_contains(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(left, right)| left.contains(&right)))
}

fn st_within(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(left, right)| right.contains(&left)))
}

fn st_intersects(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    Ok(geometry_pair(ctx)?.map(|(left, right)| left.intersects(&right)))
}

fn st_distance(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    Ok(geometry_pair(ctx)?
        .map(|(left, right)| left.distance(&right))
        .filter(|distance| distance.is_finite()))
}

fn pt_dist_within(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    let Some(radius) = number_arg(ctx, 2)? else {
        return Ok(None);
    };
    Ok(geometry_pair(ctx)?.map(|(left, right)| left.distance(&right) <= radius))
}
