// src/scene.rs - Scene camera, video backdrop and overlay draw lists
use crate::config::AppConfig;
use crate::geometry::{check_compositing_depth, extent_at_depth, CameraParams, ViewportExtent};
use crate::overlay::OverlaySnapshot;
use egui::epaint::{Mesh, Vertex};
use egui::{Color32, Pos2, Rect, TextureId};
use nalgebra::{Perspective3, Point3, Vector3};
use tokio::sync::watch;

/// Video plane facing the camera at the compositing depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backdrop {
    pub extent: ViewportExtent,
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point3<f32>; 4],
}

impl Backdrop {
    pub fn fit(camera: &CameraParams, depth: f32) -> Self {
        let extent = extent_at_depth(camera, depth);
        let (hw, hh) = (extent.width / 2.0, extent.height / 2.0);
        Self {
            extent,
            corners: [
                Point3::new(-hw, hh, -depth),
                Point3::new(hw, hh, -depth),
                Point3::new(hw, -hh, -depth),
                Point3::new(-hw, -hh, -depth),
            ],
        }
    }
}

/// Owns the camera and everything derived from the surface size. Lives on the
/// render side; the detection side only sees the camera through `camera_tx`.
pub struct SceneHost {
    camera: CameraParams,
    surface: (f32, f32),
    projection: Perspective3<f32>,
    backdrop: Backdrop,
    compositing_depth: f32,
    refit_backdrop_on_resize: bool,
    light_dir: Vector3<f32>,
    camera_tx: watch::Sender<CameraParams>,
}

impl SceneHost {
    pub fn new(config: &AppConfig) -> (Self, watch::Receiver<CameraParams>) {
        let camera = CameraParams::from_config(&config.camera);
        let depth = config.camera.compositing_depth;
        check_compositing_depth(&camera, depth);

        let (camera_tx, camera_rx) = watch::channel(camera);
        let host = Self {
            camera,
            surface: (config.camera.initial_width, config.camera.initial_height),
            projection: Self::projection_for(&camera),
            backdrop: Backdrop::fit(&camera, depth),
            compositing_depth: depth,
            refit_backdrop_on_resize: config.scene.refit_backdrop_on_resize,
            light_dir: Vector3::new(-0.4, 0.6, 0.7).normalize(),
            camera_tx,
        };
        (host, camera_rx)
    }

    fn projection_for(camera: &CameraParams) -> Perspective3<f32> {
        Perspective3::new(camera.aspect, camera.fov_radians(), camera.near, camera.far)
    }

    #[cfg(test)]
    pub fn camera(&self) -> CameraParams {
        self.camera
    }

    #[cfg(test)]
    pub fn surface_size(&self) -> (f32, f32) {
        self.surface
    }

    #[cfg(test)]
    pub fn backdrop(&self) -> &Backdrop {
        &self.backdrop
    }

    #[cfg(test)]
    pub fn compositing_depth(&self) -> f32 {
        self.compositing_depth
    }

    /// Applies a new output size. Returns false when nothing changed.
    ///
    /// The backdrop keeps its startup geometry unless refitting is enabled, so
    /// after an aspect change it no longer exactly fills the view.
    pub fn resize(&mut self, width: f32, height: f32) -> bool {
        if width <= 0.0 || height <= 0.0 {
            tracing::debug!("Ignoring resize to empty surface {}x{}", width, height);
            return false;
        }
        if self.surface == (width, height) {
            return false;
        }
        self.surface = (width, height);
        let camera = self.camera.with_surface(width, height);
        if camera != self.camera {
            self.camera = camera;
            self.projection = Self::projection_for(&camera);
            self.camera_tx.send_replace(camera);
            if self.refit_backdrop_on_resize {
                self.backdrop = Backdrop::fit(&camera, self.compositing_depth);
            }
        }
        tracing::debug!(
            "Surface resized to {}x{} (aspect {:.3})",
            width,
            height,
            self.camera.aspect
        );
        true
    }

    /// World point to surface pixels (origin top-left). `None` in front of the near plane.
    pub fn project(&self, point: &Point3<f32>) -> Option<Pos2> {
        if point.z > -self.camera.near {
            return None;
        }
        let ndc = self.projection.project_point(point);
        let (w, h) = self.surface;
        Some(Pos2::new(
            (ndc.x + 1.0) * 0.5 * w,
            (1.0 - ndc.y) * 0.5 * h,
        ))
    }

    fn project_into(&self, point: &Point3<f32>, rect: Rect) -> Option<Pos2> {
        self.project(point).map(|p| rect.min + p.to_vec2())
    }

    /// Textured quad for the video plane, in absolute coordinates inside `rect`.
    pub fn backdrop_mesh(&self, texture: TextureId, rect: Rect) -> Option<Mesh> {
        let uvs = [
            Pos2::new(0.0, 0.0),
            Pos2::new(1.0, 0.0),
            Pos2::new(1.0, 1.0),
            Pos2::new(0.0, 1.0),
        ];
        let mut mesh = Mesh::with_texture(texture);
        for (corner, uv) in self.backdrop.corners.iter().zip(uvs) {
            mesh.vertices.push(Vertex {
                pos: self.project_into(corner, rect)?,
                uv,
                color: Color32::WHITE,
            });
        }
        mesh.add_triangle(0, 1, 2);
        mesh.add_triangle(0, 2, 3);
        Some(mesh)
    }

    /// Flat-shaded, depth-sorted triangles of the posed overlay. `None` until
    /// the asset is loaded and has a pose.
    pub fn overlay_mesh(&self, snapshot: &OverlaySnapshot, rect: Rect) -> Option<Mesh> {
        let (asset, transform) = match (&snapshot.asset, &snapshot.transform) {
            (Some(asset), Some(transform)) => (asset, transform),
            _ => return None,
        };

        let world: Vec<Point3<f32>> = asset
            .vertices
            .iter()
            .map(|v| transform.transform_point(&Point3::new(v[0], v[1], v[2])))
            .collect();

        let mut faces: Vec<(f32, [Pos2; 3], Color32)> = Vec::with_capacity(asset.triangles.len());
        for tri in &asset.triangles {
            let [a, b, c] = tri.map(|i| world[i as usize]);
            let (Some(pa), Some(pb), Some(pc)) = (
                self.project_into(&a, rect),
                self.project_into(&b, rect),
                self.project_into(&c, rect),
            ) else {
                continue;
            };
            let normal = (b - a).cross(&(c - a));
            let facing = normal
                .try_normalize(f32::EPSILON)
                .map(|n| n.dot(&self.light_dir).abs())
                .unwrap_or(0.0);
            let shade = 0.35 + 0.65 * facing;
            let [r, g, bl] = asset.color;
            let color = Color32::from_rgb(
                (r as f32 * shade) as u8,
                (g as f32 * shade) as u8,
                (bl as f32 * shade) as u8,
            );
            let depth = (a.z + b.z + c.z) / 3.0;
            faces.push((depth, [pa, pb, pc], color));
        }
        if faces.is_empty() {
            return None;
        }

        // Farthest first so nearer faces paint over them.
        faces.sort_by(|x, y| x.0.total_cmp(&y.0));
        let mut mesh = Mesh::default();
        for (_, points, color) in faces {
            let base = mesh.vertices.len() as u32;
            for p in points {
                mesh.colored_vertex(p, color);
            }
            mesh.add_triangle(base, base + 1, base + 2);
        }
        Some(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{map_wrist_to_world, NormalizedLandmark};
    use crate::overlay::OverlayAsset;
    use nalgebra::{Similarity3, Translation3, UnitQuaternion};
    use std::sync::Arc;

    fn host(refit: bool) -> (SceneHost, watch::Receiver<CameraParams>) {
        let mut config = AppConfig::default();
        config.camera.initial_width = 1280.0;
        config.camera.initial_height = 720.0;
        config.scene.refit_backdrop_on_resize = refit;
        SceneHost::new(&config)
    }

    fn close(a: Pos2, b: Pos2) -> bool {
        (a - b).length() < 0.05
    }

    fn surface_corners(host: &SceneHost) -> [Pos2; 4] {
        let (w, h) = host.surface_size();
        [
            Pos2::new(0.0, 0.0),
            Pos2::new(w, 0.0),
            Pos2::new(w, h),
            Pos2::new(0.0, h),
        ]
    }

    #[test]
    fn resize_is_idempotent() {
        let (mut host, camera_rx) = host(false);
        assert!(host.resize(800.0, 600.0));
        let camera = host.camera();
        assert!(!host.resize(800.0, 600.0));
        assert_eq!(host.camera(), camera);
        assert_eq!(host.surface_size(), (800.0, 600.0));
        assert_eq!(*camera_rx.borrow(), camera);
        assert!((camera.aspect - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_resize_is_ignored() {
        let (mut host, _rx) = host(false);
        let before = host.camera();
        assert!(!host.resize(0.0, 600.0));
        assert!(!host.resize(800.0, 0.0));
        assert_eq!(host.camera(), before);
        assert_eq!(host.surface_size(), (1280.0, 720.0));
    }

    #[test]
    fn mapped_landmark_lands_on_its_pixel() {
        let (mut host, _rx) = host(false);
        for &(w, h) in &[(1280.0, 720.0), (900.0, 900.0), (640.0, 1000.0)] {
            host.resize(w, h);
            let extent = extent_at_depth(&host.camera(), host.compositing_depth());
            for &(x, y) in &[(0.5, 0.5), (0.6, 0.4), (0.1, 0.9), (0.0, 0.0)] {
                let target = map_wrist_to_world(
                    &NormalizedLandmark::new(x, y),
                    &extent,
                    host.compositing_depth(),
                );
                let pixel = host.project(&target.position).unwrap();
                assert!(
                    close(pixel, Pos2::new(x * w, y * h)),
                    "({}, {}) on {}x{} projected to {:?}",
                    x,
                    y,
                    w,
                    h,
                    pixel
                );
            }
        }
    }

    #[test]
    fn backdrop_keeps_startup_geometry_after_resize() {
        let (mut host, _rx) = host(false);
        let corners = surface_corners(&host);
        for (corner, expected) in host.backdrop().corners.iter().zip(corners) {
            assert!(close(host.project(corner).unwrap(), expected));
        }

        let startup = *host.backdrop();
        host.resize(800.0, 800.0);
        assert_eq!(*host.backdrop(), startup);
        let top_right = host.project(&host.backdrop().corners[1]).unwrap();
        assert!(!close(top_right, Pos2::new(800.0, 0.0)));
    }

    #[test]
    fn refit_backdrop_follows_resize() {
        let (mut host, _rx) = host(true);
        host.resize(800.0, 800.0);
        let corners = surface_corners(&host);
        for (corner, expected) in host.backdrop().corners.iter().zip(corners) {
            assert!(close(host.project(corner).unwrap(), expected));
        }
    }

    #[test]
    fn points_behind_near_plane_do_not_project() {
        let (host, _rx) = host(false);
        assert!(host.project(&Point3::new(0.0, 0.0, 0.0)).is_none());
        assert!(host.project(&Point3::new(0.0, 0.0, 10.0)).is_none());
        assert!(host.project(&Point3::new(0.0, 0.0, -1.0)).is_some());
    }

    #[test]
    fn backdrop_mesh_is_a_textured_quad() {
        let (host, _rx) = host(false);
        let rect = Rect::from_min_size(Pos2::new(10.0, 20.0), egui::vec2(1280.0, 720.0));
        let mesh = host.backdrop_mesh(TextureId::Managed(1), rect).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(close(mesh.vertices[0].pos, Pos2::new(10.0, 20.0)));
        assert!(close(mesh.vertices[2].pos, Pos2::new(1290.0, 740.0)));
    }

    #[test]
    fn overlay_needs_asset_and_pose() {
        let (host, _rx) = host(false);
        let rect = Rect::from_min_size(Pos2::ZERO, egui::vec2(1280.0, 720.0));
        let asset = Arc::new(OverlayAsset {
            name: "tri".to_string(),
            vertices: vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
            color: [200, 100, 50],
        });
        let mut snapshot = OverlaySnapshot::default();
        assert!(host.overlay_mesh(&snapshot, rect).is_none());

        snapshot.asset = Some(asset);
        assert!(host.overlay_mesh(&snapshot, rect).is_none());

        snapshot.transform = Some(Similarity3::from_parts(
            Translation3::new(0.0, 0.0, -500.0),
            UnitQuaternion::identity(),
            40.0,
        ));
        let mesh = host.overlay_mesh(&snapshot, rect).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        // Centered on the optical axis, so the triangle straddles the surface center.
        let center = mesh.vertices.iter().fold(egui::Vec2::ZERO, |acc, v| acc + v.pos.to_vec2()) / 3.0;
        assert!((center.x - 640.0).abs() < 1.0);
    }

    #[test]
    fn overlay_faces_are_painted_far_to_near() {
        let (host, _rx) = host(false);
        let rect = Rect::from_min_size(Pos2::ZERO, egui::vec2(1280.0, 720.0));
        let asset = Arc::new(OverlayAsset {
            name: "two".to_string(),
            vertices: vec![
                [-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [0.0, 1.0, 1.0],
                [-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [0.0, 1.0, -1.0],
            ],
            // Near triangle listed first.
            triangles: vec![[0, 1, 2], [3, 4, 5]],
            color: [255, 255, 255],
        });
        let snapshot = OverlaySnapshot {
            asset: Some(asset),
            transform: Some(Similarity3::from_parts(
                Translation3::new(0.0, 0.0, -100.0),
                UnitQuaternion::identity(),
                10.0,
            )),
        };
        let mesh = host.overlay_mesh(&snapshot, rect).unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        // The far triangle projects smaller, so its base is narrower.
        let first_width = mesh.vertices[1].pos.x - mesh.vertices[0].pos.x;
        let second_width = mesh.vertices[4].pos.x - mesh.vertices[3].pos.x;
        assert!(first_width < second_width);
    }
}
