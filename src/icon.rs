use anyhow::{Context, Result};
use icns::{IconFamily, PixelFormat};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use resvg::usvg;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tiny_skia::{Color, IntSize, Paint, Pixmap, Rect, Transform};

use crate::config::ICON_SIZE;
use crate::process::{ProcessInfo, ProcessProbe};

pub type Icon = Arc<Pixmap>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningApp {
    /// Bundle name without `.app`, e.g. `Safari`.
    pub name: String,
    pub executable: String,
    pub bundle_path: PathBuf,
}

impl RunningApp {
    fn matches(&self, app_name: &str) -> bool {
        self.name == app_name || self.executable == app_name
    }
}

/// The OS's list of running applications.
pub trait AppDirectory: Send + Sync {
    fn running_apps(&self) -> Vec<RunningApp>;
}

/// Derives running apps from the process list: any process whose executable
/// sits inside an `.app` bundle.
pub struct ProcessApps<P> {
    probe: P,
}

impl<P: ProcessProbe> ProcessApps<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: ProcessProbe> AppDirectory for ProcessApps<P> {
    fn running_apps(&self) -> Vec<RunningApp> {
        self.probe
            .processes()
            .iter()
            .filter_map(running_app)
            .collect()
    }
}

fn running_app(process: &ProcessInfo) -> Option<RunningApp> {
    let bundle_path = process.bundle_path()?;
    let name = bundle_path.file_stem()?.to_string_lossy().into_owned();
    Some(RunningApp {
        name,
        executable: process.name(),
        bundle_path,
    })
}

/// Memoized app name → icon lookup. Entries live for the whole process.
pub struct IconResolver {
    apps: Box<dyn AppDirectory>,
    icons: Mutex<HashMap<String, Icon>>,
}

impl IconResolver {
    pub fn new(apps: impl AppDirectory + 'static) -> Self {
        Self {
            apps: Box::new(apps),
            icons: Mutex::default(),
        }
    }

    /// `None` when no running application has that name. Misses are not
    /// cached, so an app launched later still resolves.
    pub fn icon(&self, app_name: &str) -> Option<Icon> {
        let mut icons = self.icons.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(icon) = icons.get(app_name) {
            return Some(icon.clone());
        }
        let app = self
            .apps
            .running_apps()
            .into_iter()
            .find(|app| app.matches(app_name))?;
        let icon = match load_icon(&app, ICON_SIZE) {
            Ok(icon) => icon,
            Err(err) => {
                tracing::debug!("no icon for {app_name}: {err:#}");
                placeholder_icon(ICON_SIZE)?
            }
        };
        let icon = Arc::new(icon);
        icons.insert(app_name.to_string(), icon.clone());
        Some(icon)
    }

    /// Resolver over the platform's list of running applications.
    pub fn system() -> Self {
        #[cfg(target_os = "macos")]
        let apps = crate::macos::WorkspaceApps;
        #[cfg(not(target_os = "macos"))]
        let apps = ProcessApps::new(crate::process::SystemProbe);
        Self::new(apps)
    }

    pub fn cached(&self) -> usize {
        self.icons.lock().map(|icons| icons.len()).unwrap_or(0)
    }
}

/// The icon file named by the bundle's `Info.plist`, if any.
fn declared_icon(bundle_path: &Path) -> Option<PathBuf> {
    let info = plist::Value::from_file(bundle_path.join("Contents/Info.plist")).ok()?;
    let file = info
        .as_dictionary()?
        .get("CFBundleIconFile")?
        .as_string()?
        .trim();
    if file.is_empty() {
        return None;
    }
    let mut path = bundle_path.join("Contents/Resources").join(file);
    if path.extension().is_none() {
        path.set_extension("icns");
    }
    Some(path)
}

fn icon_candidates(app: &RunningApp) -> Vec<PathBuf> {
    let resources = app.bundle_path.join("Contents/Resources");
    let mut candidates: Vec<PathBuf> = declared_icon(&app.bundle_path).into_iter().collect();
    let mut stems = vec!["AppIcon".to_string(), app.name.clone()];
    if app.executable != app.name {
        stems.push(app.executable.clone());
    }
    for stem in stems {
        for ext in ["icns", "png", "svg"] {
            candidates.push(resources.join(format!("{stem}.{ext}")));
        }
    }
    candidates
}

fn load_icon(app: &RunningApp, icon_size: u32) -> Result<Pixmap> {
    let path = icon_candidates(app)
        .into_iter()
        .find(|path| path.is_file())
        .context("no icon found in bundle")?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("svg") => render_svg(&path, icon_size),
        Some("icns") => render_icns(&path, icon_size),
        _ => {
            let image =
                image::open(&path).with_context(|| format!("open icon {}", path.display()))?;
            let resized = image.resize_exact(icon_size, icon_size, FilterType::Lanczos3);
            pixmap_from_image(resized)
        }
    }
}

/// Decodes the largest image in an `.icns` family.
fn render_icns(path: &Path, size: u32) -> Result<Pixmap> {
    let file = File::open(path).with_context(|| format!("open icns {}", path.display()))?;
    let family = IconFamily::read(BufReader::new(file))
        .with_context(|| format!("parse icns {}", path.display()))?;
    let kind = family
        .available_icons()
        .into_iter()
        .max_by_key(|kind| kind.pixel_width())
        .context("icns holds no images")?;
    let icon = family
        .get_icon_with_type(kind)
        .with_context(|| format!("decode {kind:?} from {}", path.display()))?
        .convert_to(PixelFormat::RGBA);
    let (width, height) = (icon.width(), icon.height());
    let rgba = RgbaImage::from_raw(width, height, icon.into_data().into_vec())
        .context("icns image has the wrong length")?;
    let resized = DynamicImage::ImageRgba8(rgba).resize_exact(size, size, FilterType::Lanczos3);
    pixmap_from_image(resized)
}

fn pixmap_from_image(image: DynamicImage) -> Result<Pixmap> {
    let rgba = image.to_rgba8();
    let size = IntSize::from_wh(rgba.width(), rgba.height()).context("empty icon")?;
    Pixmap::from_vec(rgba.into_raw(), size).context("pixmap from image")
}

fn placeholder_icon(size: u32) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(size, size)?;
    let mut paint = Paint::default();
    paint.set_color(Color::from_rgba8(90, 90, 90, 255));
    pixmap.fill_rect(
        Rect::from_xywh(0.0, 0.0, size as f32, size as f32)?,
        &paint,
        Transform::identity(),
        None,
    );
    Some(pixmap)
}

fn render_svg(path: &Path, size: u32) -> Result<Pixmap> {
    let data = fs::read(path).with_context(|| format!("read svg {}", path.display()))?;
    let options = usvg::Options::default();
    let tree = usvg::Tree::from_data(&data, &options)
        .with_context(|| format!("parse svg {}", path.display()))?;
    let mut pixmap = Pixmap::new(size, size).context("create svg pixmap")?;
    let tree_size = tree.size();
    let scale = (size as f32 / tree_size.width()).min(size as f32 / tree_size.height());
    let dx = (size as f32 - tree_size.width() * scale) * 0.5;
    let dy = (size as f32 - tree_size.height() * scale) * 0.5;
    let transform = Transform::from_scale(scale, scale).post_translate(dx, dy);
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApps {
        apps: Vec<RunningApp>,
        lookups: Arc<AtomicUsize>,
    }

    impl AppDirectory for FakeApps {
        fn running_apps(&self) -> Vec<RunningApp> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.apps.clone()
        }
    }

    fn bundle(tag: &str, name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("spacesync-icons-{}-{tag}", std::process::id()))
            .join(format!("{name}.app"));
        fs::create_dir_all(dir.join("Contents/Resources")).unwrap();
        dir
    }

    fn resolver(apps: Vec<RunningApp>) -> (IconResolver, Arc<AtomicUsize>) {
        let lookups = Arc::new(AtomicUsize::new(0));
        let resolver = IconResolver::new(FakeApps {
            apps,
            lookups: lookups.clone(),
        });
        (resolver, lookups)
    }

    fn app(name: &str, bundle_path: PathBuf) -> RunningApp {
        RunningApp {
            name: name.to_string(),
            executable: name.to_string(),
            bundle_path,
        }
    }

    #[test]
    fn second_lookup_hits_cache() {
        let (resolver, lookups) = resolver(vec![app("Notes", bundle("cache", "Notes"))]);
        let first = resolver.icon("Notes").unwrap();
        let second = resolver.icon("Notes").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn unknown_app_is_not_cached() {
        let (resolver, lookups) = resolver(Vec::new());
        assert!(resolver.icon("Ghost").is_none());
        assert!(resolver.icon("Ghost").is_none());
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached(), 0);
    }

    #[test]
    fn missing_icon_file_gets_placeholder() {
        let (resolver, _) = resolver(vec![app("Bare", bundle("bare", "Bare"))]);
        let icon = resolver.icon("Bare").unwrap();
        assert_eq!((icon.width(), icon.height()), (ICON_SIZE, ICON_SIZE));
    }

    #[test]
    fn png_icon_is_resized() {
        let path = bundle("png", "Paint");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255]))
            .save(path.join("Contents/Resources/AppIcon.png"))
            .unwrap();
        let (resolver, _) = resolver(vec![app("Paint", path)]);
        let icon = resolver.icon("Paint").unwrap();
        assert_eq!(icon.width(), ICON_SIZE);
        let pixel = icon.pixel(ICON_SIZE / 2, ICON_SIZE / 2).unwrap();
        assert_eq!((pixel.red(), pixel.green(), pixel.alpha()), (255, 0, 255));
    }

    #[test]
    fn svg_icon_is_rendered() {
        let path = bundle("svg", "Vector");
        fs::write(
            path.join("Contents/Resources/Vector.svg"),
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10" fill="#00ff00"/></svg>"##,
        )
        .unwrap();
        let (resolver, _) = resolver(vec![app("Vector", path)]);
        let icon = resolver.icon("Vector").unwrap();
        let pixel = icon.pixel(ICON_SIZE / 2, ICON_SIZE / 2).unwrap();
        assert_eq!((pixel.green(), pixel.alpha()), (255, 255));
    }

    fn write_icns(path: &Path, rgba: [u8; 4]) {
        let mut image = icns::Image::new(PixelFormat::RGBA, 32, 32);
        for pixel in image.data_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        let mut family = IconFamily::new();
        family.add_icon(&image).unwrap();
        family.write(File::create(path).unwrap()).unwrap();
    }

    #[test]
    fn icns_icon_is_decoded() {
        let path = bundle("icns", "Mail");
        write_icns(&path.join("Contents/Resources/AppIcon.icns"), [255, 0, 0, 255]);
        let (resolver, _) = resolver(vec![app("Mail", path)]);
        let icon = resolver.icon("Mail").unwrap();
        assert_eq!((icon.width(), icon.height()), (ICON_SIZE, ICON_SIZE));
        let pixel = icon.pixel(ICON_SIZE / 2, ICON_SIZE / 2).unwrap();
        assert_eq!((pixel.red(), pixel.green(), pixel.alpha()), (255, 0, 255));
    }

    #[test]
    fn info_plist_names_the_icon_file() {
        let path = bundle("plist", "Calendar");
        let resources = path.join("Contents/Resources");
        // A differently colored AppIcon must lose to the declared file.
        write_icns(&resources.join("AppIcon.icns"), [255, 0, 0, 255]);
        write_icns(&resources.join("Custom.icns"), [0, 0, 255, 255]);
        let mut info = plist::Dictionary::new();
        info.insert("CFBundleIconFile".to_string(), plist::Value::String("Custom".to_string()));
        plist::Value::Dictionary(info)
            .to_file_xml(path.join("Contents/Info.plist"))
            .unwrap();

        assert_eq!(declared_icon(&path), Some(resources.join("Custom.icns")));
        let (resolver, _) = resolver(vec![app("Calendar", path)]);
        let icon = resolver.icon("Calendar").unwrap();
        let pixel = icon.pixel(ICON_SIZE / 2, ICON_SIZE / 2).unwrap();
        assert_eq!((pixel.red(), pixel.blue()), (0, 255));
    }

    #[test]
    fn matches_by_executable_name() {
        let mut code = app("Visual Studio Code", bundle("exe", "Visual Studio Code"));
        code.executable = "Code".to_string();
        let (resolver, _) = resolver(vec![code]);
        assert!(resolver.icon("Code").is_some());
    }

    #[test]
    fn process_apps_keep_bundled_processes() {
        struct Listing;
        impl ProcessProbe for Listing {
            fn processes(&self) -> Vec<ProcessInfo> {
                vec![
                    ProcessInfo {
                        path: "/usr/sbin/cfprefsd".into(),
                    },
                    ProcessInfo {
                        path: "/Applications/Safari.app/Contents/MacOS/Safari".into(),
                    },
                ]
            }
        }
        let apps = ProcessApps::new(Listing).running_apps();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "Safari");
        assert_eq!(apps[0].bundle_path, PathBuf::from("/Applications/Safari.app"));
    }
}
