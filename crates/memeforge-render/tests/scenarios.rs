//! End-to-end editing and rendering scenarios.

use kurbo::{Point, Size};
use memeforge_core::{
    BaseImage, Bitmap, CollectingSink, Diagnostic, Effects, Glow, InteractionEngine,
    InteractionKind, Layer, LayerUpdate, MemeColor, MemeDocument, Outline, PointerEvent, Shadow,
    StickerLayer, TextDefaults,
};
use memeforge_render::{
    CompositeRequest, RenderResources, Surface, render_composite, render_layer_preview,
};

const POINTER: u64 = 1;

fn resources() -> RenderResources {
    let mut resources = RenderResources::new().unwrap();
    resources
        .bitmaps
        .insert_bitmap("red", &Bitmap::solid(100, 50, [255, 0, 0, 255]).unwrap())
        .unwrap();
    resources
        .bitmaps
        .insert_bitmap("blue", &Bitmap::solid(8, 8, [0, 0, 255, 255]).unwrap())
        .unwrap();
    resources
}

fn render(resources: &mut RenderResources, layers: &[Layer], w: f64, h: f64, scale: f64) -> Surface {
    let mut slot = None;
    let request = CompositeRequest::new(layers, w, h).with_scale(scale);
    render_composite(&mut slot, resources, &request, None).unwrap();
    slot.unwrap()
}

fn rgba(surface: &Surface, x: i64, y: i64) -> [u8; 4] {
    if x < 0 || y < 0 {
        return [0; 4];
    }
    surface
        .pixmap()
        .pixel(x as u32, y as u32)
        .map(|p| [p.red(), p.green(), p.blue(), p.alpha()])
        .unwrap_or([0; 4])
}

fn sticker_at(src: &str, w: u32, h: u32, x: f64, y: f64) -> StickerLayer {
    let mut sticker = StickerLayer::new(src, "", w, h).unwrap();
    sticker.x = x;
    sticker.y = y;
    sticker
}

#[test]
fn outlined_text_has_outline_in_all_directions() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 240, 120));
    let defaults = TextDefaults {
        text: "HI".to_string(),
        font_size: 40.0,
        color: MemeColor::white(),
        outline_color: MemeColor::black(),
        outline_width: 2.0,
        ..TextDefaults::default()
    };
    let id = doc.add_text(&defaults, &resources.fonts);
    let outlined = doc.get(id).unwrap().clone();
    let mut plain = outlined.clone();
    *plain.effects_mut() = Effects::none();

    let fill = render(&mut resources, &[plain], 240.0, 120.0, 1.0);
    let out = render(&mut resources, std::slice::from_ref(&outlined), 240.0, 120.0, 1.0);

    // Locate the stem of the "I" on the middle row: the rightmost fill run.
    let row = outlined.center().y as i64;
    let right = (0..240)
        .rev()
        .find(|&x| rgba(&fill, x, row)[3] == 255)
        .expect("glyph fill on the middle row");
    let left = (0..right)
        .rev()
        .find(|&x| rgba(&fill, x, row)[3] < 255)
        .unwrap()
        + 1;
    let center = ((left + right) / 2, row);

    // Fill color visible on the glyph centerline.
    assert_eq!(rgba(&out, center.0, center.1), [255, 255, 255, 255]);

    for (dx, dy) in [
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
        (-1, -1),
    ] {
        // First pixel along the ray that the fill does not touch at all.
        let mut p = center;
        while rgba(&fill, p.0, p.1)[3] != 0 {
            p = (p.0 + dx, p.1 + dy);
        }
        assert_eq!(
            rgba(&out, p.0, p.1),
            [0, 0, 0, 255],
            "direction ({dx}, {dy}) at {p:?}"
        );
    }
}

#[test]
fn sticker_resize_keeps_aspect_ratio() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 400, 300));
    let id = doc.add_layer(Layer::Sticker(sticker_at("red", 100, 50, 50.0, 50.0)));
    doc.select(id).unwrap();
    let mut engine = InteractionEngine::default();
    let handle = engine.selection_handles(&doc).unwrap()[1].position;
    assert_eq!(handle, Point::new(150.0, 100.0));

    for event in [
        PointerEvent::Down {
            pointer_id: POINTER,
            position: handle,
        },
        PointerEvent::Move {
            pointer_id: POINTER,
            position: handle + (50.0, 10.0),
        },
        PointerEvent::Up {
            pointer_id: POINTER,
            position: handle + (50.0, 10.0),
        },
    ] {
        engine
            .handle_event(&mut doc, event, &resources.fonts, None)
            .unwrap();
    }

    let layer = doc.get(id).unwrap();
    assert!((layer.size().width - 150.0).abs() < 1e-9);
    assert!((layer.size().height - 75.0).abs() < 1e-9);
    assert!((layer.size().width / layer.size().height - 2.0).abs() < 1e-9);

    // The rendered sticker covers its new box.
    let surface = render(&mut resources, doc.layers(), 400.0, 300.0, 1.0);
    assert_eq!(rgba(&surface, 198, 123), [255, 0, 0, 255]);
    assert_eq!(rgba(&surface, 202, 127)[3], 0);
}

#[test]
fn rotate_gesture_adds_pointer_angle() {
    let resources = resources();
    for start in [0.0, 33.0, -170.0] {
        let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 400, 300));
        let mut sticker = sticker_at("red", 100, 50, 100.0, 100.0);
        sticker.rotation = start;
        let id = doc.add_layer(Layer::Sticker(sticker));
        let center = doc.get(id).unwrap().center();

        let mut engine = InteractionEngine::default();
        engine
            .begin(
                &mut doc,
                id,
                InteractionKind::Rotate,
                POINTER,
                center + (80.0, 0.0),
            )
            .unwrap();
        engine
            .handle_event(
                &mut doc,
                PointerEvent::Move {
                    pointer_id: POINTER,
                    position: center + (0.0, 80.0),
                },
                &resources.fonts,
                None,
            )
            .unwrap();
        engine.end();

        let rotation = doc.get(id).unwrap().rotation();
        assert!((rotation - (start + 90.0)).abs() < 1e-9, "{start} -> {rotation}");
        assert!((doc.get(id).unwrap().size().width - 100.0).abs() < 1e-9);
    }
}

#[test]
fn failed_sticker_leaves_composite_unchanged() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 200, 150));
    doc.add_text(&TextDefaults::default(), &resources.fonts);
    doc.add_layer(Layer::Sticker(sticker_at("blue", 40, 40, 20.0, 20.0)));
    let without = doc.snapshot();

    let broken = sticker_at("https://example.invalid/missing.png", 60, 60, 60.0, 40.0)
        .with_effects(Effects::none().with_shadow(Shadow::new(MemeColor::black(), 6.0, 4.0, 4.0)));
    let broken_id = doc.add_layer(Layer::Sticker(broken));
    let with = doc.snapshot();

    let sink = CollectingSink::new();
    let mut slot = None;
    let request = CompositeRequest::new(&with, 200.0, 150.0).with_scale(1.5);
    let (_, report) = render_composite(&mut slot, &mut resources, &request, Some(&sink)).unwrap();
    let with_broken = slot.unwrap();
    let reference = render(&mut resources, &without, 200.0, 150.0, 1.5);

    assert_eq!(with_broken.pixmap().data(), reference.pixmap().data());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.drawn, 2);
    assert!(
        sink.drain()
            .iter()
            .any(|d| matches!(d, Diagnostic::LayerSkipped { layer_id, .. } if *layer_id == broken_id))
    );
}

#[test]
fn composite_is_deterministic() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 160, 120));
    let text = doc.add_text(&TextDefaults::default(), &resources.fonts);
    doc.update_layer(text, LayerUpdate::Rotate(-12.0), &resources.fonts)
        .unwrap();
    let sticker = doc.add_layer(Layer::Sticker(
        sticker_at("blue", 30, 30, 90.0, 60.0).with_effects(
            Effects::none()
                .with_outline(Outline::new(MemeColor::white(), 3.0))
                .with_shadow(Shadow::new(MemeColor::black(), 5.0, 3.0, 3.0)),
        ),
    ));
    doc.update_layer(sticker, LayerUpdate::Rotate(30.0), &resources.fonts)
        .unwrap();
    let layers = doc.snapshot();

    let first = render(&mut resources, &layers, 160.0, 120.0, 2.0);

    // Reuse a surface that previously held something else.
    let mut slot = Some(render(&mut resources, &layers[..1], 160.0, 120.0, 2.0));
    let request = CompositeRequest::new(&layers, 160.0, 120.0).with_scale(2.0);
    render_composite(&mut slot, &mut resources, &request, None).unwrap();

    assert_eq!(first.pixmap().data(), slot.unwrap().pixmap().data());
}

#[test]
fn effects_scale_with_render_scale() {
    let mut resources = resources();
    let sticker = sticker_at("blue", 40, 40, 20.0, 20.0).with_effects(
        Effects::none()
            .with_outline(Outline::new(MemeColor::rgb(0, 255, 0), 3.0))
            .with_shadow(Shadow::new(MemeColor::black(), 4.0, 12.0, 0.0)),
    );
    let layers = vec![Layer::Sticker(sticker)];

    // Outline: opaque green run left of the content on the middle row.
    let outline_extent = |surface: &Surface, scale: f64| {
        let row = (40.0 * scale) as i64;
        let left = (20.0 * scale) as i64;
        (0..left)
            .filter(|&x| rgba(surface, x, row) == [0, 255, 0, 255])
            .count() as i64
    };
    // Shadow: distance from the content's right edge to where it fades
    // below half opacity.
    let shadow_extent = |surface: &Surface, scale: f64| {
        let row = (40.0 * scale) as i64;
        let edge = (60.0 * scale) as i64;
        (edge..surface.width() as i64)
            .find(|&x| rgba(surface, x, row)[3] < 128)
            .unwrap()
            - edge
    };

    let one = render(&mut resources, &layers, 120.0, 80.0, 1.0);
    let two = render(&mut resources, &layers, 120.0, 80.0, 2.0);

    assert_eq!(outline_extent(&one, 1.0), 3);
    assert_eq!(outline_extent(&two, 2.0), 6);

    let (s1, s2) = (shadow_extent(&one, 1.0), shadow_extent(&two, 2.0));
    assert!((s2 - 2 * s1).abs() <= 2, "shadow {s1} at 1x, {s2} at 2x");
    assert!(s1 >= 10);
}

#[test]
fn equal_z_renders_in_insertion_order() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 100, 100));
    let mut layers = Vec::new();
    for src in ["red", "blue"] {
        let mut sticker = StickerLayer::new(src, "", 60, 60).unwrap();
        sticker.z_index = 5;
        layers.push(doc.add_layer(Layer::Sticker(sticker)));
    }

    let ordered: Vec<_> = doc.layers_ordered().iter().map(|l| l.id()).collect();
    assert_eq!(ordered, layers);

    let surface = render(&mut resources, doc.layers(), 100.0, 100.0, 1.0);
    assert_eq!(rgba(&surface, 30, 30), [0, 0, 255, 255]);
}

#[test]
fn text_fill_stays_clean_under_offset_shadow_and_glow() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 240, 120));
    let defaults = TextDefaults {
        text: "I".to_string(),
        font_size: 60.0,
        color: MemeColor::white(),
        outline_width: 0.0,
        ..TextDefaults::default()
    };
    let id = doc.add_text(&defaults, &resources.fonts);
    let plain = doc.get(id).unwrap().clone();
    let mut styled = plain.clone();
    *styled.effects_mut() = Effects::none()
        .with_shadow(Shadow::new(MemeColor::black(), 2.0, 60.0, 0.0))
        .with_glow(Glow::new(MemeColor::rgb(0, 255, 0), 4.0));

    let fill = render(&mut resources, std::slice::from_ref(&plain), 240.0, 120.0, 1.0);
    let out = render(&mut resources, std::slice::from_ref(&styled), 240.0, 120.0, 1.0);

    let row = plain.center().y as i64;
    let right = (0..240)
        .rev()
        .find(|&x| rgba(&fill, x, row)[3] == 255)
        .expect("glyph fill on the middle row");
    let left = (0..right)
        .rev()
        .find(|&x| rgba(&fill, x, row)[3] < 255)
        .unwrap()
        + 1;
    let stem = (left + right) / 2;

    // The fill is drawn last and without a shadow of its own.
    assert_eq!(rgba(&out, stem, row), [255, 255, 255, 255]);

    // Glow hugs the glyph.
    let halo = rgba(&out, right + 3, row);
    assert!(halo[1] > 0 && halo[3] > 0, "glow beside the stem: {halo:?}");
    assert!(halo[0] < 255, "glow is not fill-colored: {halo:?}");

    // The shadow only lands at its offset.
    let shadow = rgba(&out, stem + 60, row);
    assert!(shadow[3] > 128, "shadow at the offset: {shadow:?}");
    assert!(shadow[0] < 40 && shadow[1] < 40 && shadow[2] < 40);
    assert_eq!(rgba(&out, stem - 60, row), [0, 0, 0, 0]);
    assert_eq!(rgba(&out, stem, row - 50), [0, 0, 0, 0]);
}

#[test]
fn layer_preview_matches_composite_for_overflowing_text() {
    let mut resources = resources();
    let mut doc = MemeDocument::new().with_base_image(BaseImage::new("base", 300, 200));
    let defaults = TextDefaults {
        text: "HELLO".to_string(),
        font_size: 40.0,
        outline_width: 0.0,
        ..TextDefaults::default()
    };
    let id = doc.add_text(&defaults, &resources.fonts);
    doc.update_layer(id, LayerUpdate::Resize(Size::new(20.0, 20.0)), &resources.fonts)
        .unwrap();

    for rotation in [0.0, 30.0] {
        doc.update_layer(id, LayerUpdate::Rotate(rotation), &resources.fonts)
            .unwrap();
        let layer = doc.get(id).unwrap().clone();
        let full = render(&mut resources, std::slice::from_ref(&layer), 300.0, 200.0, 1.0);

        let mut slot = None;
        let preview = render_layer_preview(&mut slot, &mut resources, &layer, 1.0, None).unwrap();
        let surface = slot.unwrap();
        let (ox, oy) = (preview.origin.x as i64, preview.origin.y as i64);

        let box_bounds = layer.rotated_bounds();
        let mut composite_ink = 0;
        let mut outside_box = 0;
        let mut preview_ink = 0;
        for y in 0..200 {
            for x in 0..300 {
                let alpha = rgba(&full, x, y)[3];
                if alpha == 0 {
                    continue;
                }
                composite_ink += 1;
                if !box_bounds.contains(Point::new(x as f64 + 0.5, y as f64 + 0.5)) {
                    outside_box += 1;
                }
                let in_preview = rgba(&surface, x - ox, y - oy)[3];
                if in_preview > 0 {
                    preview_ink += 1;
                }
                assert!(
                    alpha.abs_diff(in_preview) <= 8,
                    "pixel ({x}, {y}) at {rotation}deg: composite {alpha}, preview {in_preview}"
                );
            }
        }
        // The word is far wider than its 20x20 box.
        assert!(outside_box > composite_ink / 2, "{outside_box} of {composite_ink}");
        assert!(preview_ink * 100 >= composite_ink * 99, "{preview_ink} of {composite_ink}");
    }
}
