use glam::{Quat, Vec2, Vec3};
use pretty_assertions::assert_eq;

use macodyssey::formats::mdl::controllers::{ORIENTATION, POSITION};
use macodyssey::formats::mdl::layout::{
    FILE_HEADER_SIZE, GEOMETRY_HEADER_SIZE, MODEL_HEADER_SIZE,
};
use macodyssey::geometry::{build_aabb_tree, compute_tangent_space};
use macodyssey::prelude::*;

// =============================================================================
// FIXTURE
// =============================================================================

fn base_controllers(position: Vec3, orientation: Quat) -> Vec<Controller> {
    vec![
        Controller::single(POSITION, vec![position.x, position.y, position.z]),
        Controller::single(
            ORIENTATION,
            vec![orientation.x, orientation.y, orientation.z, orientation.w],
        ),
    ]
}

fn dummy_node(id: u16, name: &str, position: Vec3) -> Node {
    let mut node = Node::new(id, name);
    node.position = position;
    node.controllers = base_controllers(position, node.orientation);
    node
}

fn trimesh_node() -> Node {
    let mut node = dummy_node(1, "torso", Vec3::new(0.0, 0.0, 1.0));
    let positions = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
    ];
    let uv1 = vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
    ];
    let faces = vec![
        Face {
            indices: [0, 1, 2],
            material: 1,
            ..Face::default()
        },
        Face {
            indices: [1, 3, 2],
            material: 1,
            ..Face::default()
        },
    ];
    let tangents = compute_tangent_space(&positions, &uv1, &faces);
    let mut mesh = Mesh {
        positions,
        normals: vec![Vec3::Z; 4],
        uv2: uv1.iter().map(|uv| *uv * 0.5).collect(),
        uv1,
        tangents,
        faces,
        texture1: "plate01".to_string(),
        texture2: "plate01lm".to_string(),
        has_lightmap: true,
        animate_uv: true,
        uv_direction_x: 0.25,
        uv_direction_y: -0.5,
        ..Mesh::default()
    };
    mesh.recompute_face_geometry();
    node.payload = NodePayload::Mesh(Box::new(MeshPayload {
        mesh,
        kind: MeshKind::Trimesh,
    }));
    node
}

fn skin_node(node_count: usize) -> Node {
    let mut node = dummy_node(2, "arm", Vec3::ZERO);
    let positions = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 2.0, 0.0),
    ];
    let mut mesh = Mesh {
        positions,
        normals: vec![Vec3::X; 3],
        uv1: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
        faces: vec![Face {
            indices: [0, 1, 2],
            material: 2,
            ..Face::default()
        }],
        bone_weights: vec![
            [1.0, 0.0, 0.0, 0.0],
            [0.5, 0.5, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
        ],
        bone_indices: vec![[1, 0, 0, 0], [1, 2, 0, 0], [2, 0, 0, 0]],
        texture1: "skin01".to_string(),
        ..Mesh::default()
    };
    mesh.recompute_face_geometry();

    let mut bonemap = vec![-1i32; node_count];
    bonemap[1] = 1; // torso
    bonemap[2] = 9; // tip
    let skin = Skin {
        bonemap,
        bone_orientations: vec![
            Quat::IDENTITY,
            Quat::from_xyzw(0.0, 0.5, 0.0, 0.875),
            Quat::from_xyzw(0.5, 0.0, 0.0, 0.875),
        ],
        bone_translations: vec![Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 2.0, 0.0)],
        bone_serial: Vec::new(),
        bone_node_id: Vec::new(),
    };
    node.payload = NodePayload::Mesh(Box::new(MeshPayload {
        mesh,
        kind: MeshKind::Skin(skin),
    }));
    node
}

fn dangly_node() -> Node {
    let mut node = dummy_node(3, "cloak", Vec3::new(0.0, -1.0, 0.0));
    let mut mesh = Mesh {
        positions: vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -1.0),
        ],
        faces: vec![Face {
            indices: [0, 1, 2],
            material: 3,
            ..Face::default()
        }],
        texture1: "cloth02".to_string(),
        ..Mesh::default()
    };
    mesh.recompute_face_geometry();
    node.payload = NodePayload::Mesh(Box::new(MeshPayload {
        mesh,
        kind: MeshKind::Dangly(Dangly {
            constraints: vec![255.0, 128.0, 0.0],
            displacement: 0.5,
            tightness: 2.0,
            period: 1.5,
        }),
    }));
    node
}

fn light_node() -> Node {
    let mut node = dummy_node(4, "lamp", Vec3::new(0.0, 0.0, 2.0));
    node.controllers
        .push(Controller::single(76, vec![0.9, 0.8, 0.7])); // color
    node.controllers.push(Controller {
        controller_type: 88, // radius
        interpolation: Interpolation::Linear,
        rows: vec![
            ControllerRow {
                time: 0.0,
                values: vec![2.0],
            },
            ControllerRow {
                time: 1.0,
                values: vec![4.0],
            },
        ],
    });
    node.payload = NodePayload::Light(Box::new(Light {
        flare_radius: 3.5,
        flare_sizes: vec![1.0, 0.5],
        flare_positions: vec![0.25, 0.75],
        flare_color_shifts: vec![Vec3::new(0.1, 0.2, 0.3), Vec3::ZERO],
        flare_textures: vec!["flare01".to_string(), "flare02".to_string()],
        priority: 3,
        ambient_only: false,
        dynamic_type: 1,
        affect_dynamic: true,
        shadow: true,
        flare: true,
        fading: false,
    }));
    node
}

fn emitter_node() -> Node {
    let mut node = dummy_node(5, "sparks", Vec3::new(1.0, 1.0, 1.0));
    node.controllers.push(Controller {
        controller_type: 88, // birthrate
        interpolation: Interpolation::Linear,
        rows: vec![
            ControllerRow {
                time: 0.0,
                values: vec![20.0],
            },
            ControllerRow {
                time: 0.5,
                values: vec![0.0],
            },
        ],
    });
    node.payload = NodePayload::Emitter(Box::new(Emitter {
        dead_space: 0.25,
        blast_radius: 2.0,
        blast_length: 0.5,
        branch_count: 3,
        ctrl_pt_smoothing: 0.5,
        x_grid: 4,
        y_grid: 4,
        spawn_type: 1,
        update: "Fountain".to_string(),
        render: "Normal".to_string(),
        blend: "Lighten".to_string(),
        texture: "fx_spark01".to_string(),
        chunk_name: String::new(),
        twosided_texture: true,
        looping: true,
        render_order: 2,
        frame_blending: false,
        depth_texture: String::new(),
        flags: 0x20,
    }));
    node
}

fn reference_node() -> Node {
    let mut node = dummy_node(6, "hook", Vec3::ZERO);
    node.payload = NodePayload::Reference(Reference {
        model: "fx_hook".to_string(),
        reattachable: true,
    });
    node
}

fn saber_node() -> Node {
    let mut node = dummy_node(7, "blade", Vec3::new(0.0, 0.5, 0.0));
    let positions: Vec<Vec3> = (0..176)
        .map(|i| Vec3::new(i as f32 * 0.05, (i % 2) as f32 * 0.125, (i / 44) as f32))
        .collect();
    let uv1: Vec<Vec2> = (0..176)
        .map(|i| Vec2::new(i as f32 / 256.0, 0.5))
        .collect();
    let mesh = Mesh {
        positions,
        uv1,
        normals: vec![Vec3::Z; 176],
        faces: macodyssey::model::mesh::saber_faces(),
        texture1: "w_lsabreblue01".to_string(),
        ..Mesh::default()
    };
    node.payload = NodePayload::Mesh(Box::new(MeshPayload {
        mesh,
        kind: MeshKind::Saber,
    }));
    node
}

fn aabb_node() -> Node {
    let mut node = dummy_node(8, "walk", Vec3::ZERO);
    let mut positions = Vec::new();
    for i in 0..4 {
        positions.push(Vec3::new(i as f32, 0.0, 0.0));
        positions.push(Vec3::new(i as f32, 1.0, 0.0));
    }
    let mut faces = Vec::new();
    for i in 0..3u16 {
        let a = 2 * i;
        faces.push(Face {
            indices: [a, a + 1, a + 2],
            material: 7,
            ..Face::default()
        });
        faces.push(Face {
            indices: [a + 1, a + 3, a + 2],
            material: 7,
            ..Face::default()
        });
    }
    let tree = build_aabb_tree(&positions, &faces);
    let mut mesh = Mesh {
        positions,
        faces,
        render: false,
        ..Mesh::default()
    };
    mesh.recompute_face_geometry();
    node.payload = NodePayload::Mesh(Box::new(MeshPayload {
        mesh,
        kind: MeshKind::Aabb(tree),
    }));
    node
}

fn wave_animation() -> Animation {
    let mut anim = Animation::new("wave", "droid");
    anim.length = 2.0;
    anim.transition_time = 0.25;
    anim.events = vec![
        AnimationEvent {
            time: 0.5,
            name: "snd_footstep".to_string(),
        },
        AnimationEvent {
            time: 1.5,
            name: "detonate".to_string(),
        },
    ];
    let mut root = AnimationNode::new(0, "droid");
    root.controllers.push(Controller {
        controller_type: POSITION,
        interpolation: Interpolation::Bezier,
        rows: vec![
            ControllerRow {
                time: 0.0,
                values: vec![0.0, 0.0, 0.0, 0.25, 0.25, 0.25, -0.5, -0.5, -0.5],
            },
            ControllerRow {
                time: 1.0,
                values: vec![1.0, 2.0, 3.0, 1.25, 2.25, 3.25, 0.5, 1.5, 2.5],
            },
        ],
    });
    let mut torso = AnimationNode::new(1, "torso");
    torso.controllers.push(Controller {
        controller_type: ORIENTATION,
        interpolation: Interpolation::Linear,
        rows: vec![
            ControllerRow {
                time: 0.0,
                values: vec![0.0, 0.0, 0.0, 1.0],
            },
            ControllerRow {
                time: 2.0,
                values: vec![0.0, 0.5, 0.0, 0.875],
            },
        ],
    });
    torso.controllers.push(Controller {
        controller_type: 132, // alpha, mesh namespace
        interpolation: Interpolation::Linear,
        rows: vec![
            ControllerRow {
                time: 0.0,
                values: vec![1.0],
            },
            ControllerRow {
                time: 2.0,
                values: vec![0.0],
            },
        ],
    });
    root.children.push(torso);
    anim.root = root;
    anim
}

/// A model exercising every payload kind and controller shape.
fn fixture() -> Model {
    let mut model = Model::new("droid");
    model.classification = Classification::Character;
    model.supermodel = Some("s_male02".to_string());
    model.animation_scale = 0.971;
    model.affected_by_fog = true;

    let mut root = dummy_node(0, "droid", Vec3::ZERO);
    let mut torso = trimesh_node();
    torso.children.push(dummy_node(9, "tip", Vec3::new(0.0, 2.0, 1.0)));
    root.children.push(torso);
    root.children.push(skin_node(10));
    root.children.push(dangly_node());
    root.children.push(light_node());
    root.children.push(emitter_node());
    root.children.push(reference_node());
    root.children.push(saber_node());
    root.children.push(aabb_node());
    model.root = root;

    model.animations = vec![wave_animation(), {
        let mut anim = Animation::new("die", "droid");
        anim.length = 1.0;
        anim.transition_time = 0.5;
        anim
    }];

    // Derived skin lookup tables, as the reader would build them.
    let serial_ids = model.serial_node_ids();
    for node in &mut model.root.children {
        if let Some(payload) = node.mesh_mut()
            && let MeshKind::Skin(skin) = &mut payload.kind
        {
            skin.rebuild_bone_tables(&serial_ids);
        }
    }
    model
}

fn encode_default(model: &Model, variant: Variant) -> (Vec<u8>, Vec<u8>) {
    encode_model(model, variant, &WriteOptions::default()).unwrap()
}

// =============================================================================
// ROUND-TRIP PROPERTIES
// =============================================================================

#[test]
fn test_roundtrip_covers_every_payload() {
    let model = fixture();
    let (mdl, mdx) = encode_default(&model, Variant::KotorPc);
    let decoded = decode_model(&mdl, Some(&mdx)).unwrap();
    assert_eq!(decoded, model);
}

#[test]
fn test_roundtrip_is_idempotent() {
    let model = fixture();
    let (mdl1, mdx1) = encode_default(&model, Variant::KotorPc);
    let decoded = decode_model(&mdl1, Some(&mdx1)).unwrap();
    let (mdl2, mdx2) = encode_default(&decoded, Variant::KotorPc);
    assert_eq!(mdl1, mdl2);
    assert_eq!(mdx1, mdx2);
}

#[test]
fn test_derived_mesh_fields_recompute_from_decoded_geometry() {
    let model = fixture();
    let (mdl, mdx) = encode_default(&model, Variant::KotorPc);
    let decoded = decode_model(&mdl, Some(&mdx)).unwrap();

    for (original, redecoded) in model.iter_nodes().zip(decoded.iter_nodes()) {
        if let (Some(a), Some(b)) = (original.mesh(), redecoded.mesh()) {
            assert_eq!(a.mesh.compute_bounds(), b.mesh.compute_bounds());
        }
    }
}

#[test]
fn test_roundtrip_second_edition_xbox() {
    // The TSL layouts carry the dirt fields; Xbox packs bone indices as i16.
    let mut model = fixture();
    for node in &mut model.root.children {
        if let Some(payload) = node.mesh_mut() {
            payload.mesh.dirt_enabled = true;
            payload.mesh.dirt_texture = 3;
            payload.mesh.dirt_coord_space = 1;
            payload.mesh.hide_in_holograms = true;
        }
    }
    let (mdl, mdx) = encode_default(&model, Variant::TslXbox);
    assert_eq!(sniff_variant(&mdl).unwrap(), Variant::TslXbox);
    let decoded = decode_model(&mdl, Some(&mdx)).unwrap();
    assert_eq!(decoded, model);
}

#[test]
fn test_all_variants_roundtrip() {
    let model = fixture();
    for variant in Variant::ALL {
        let (mdl, mdx) = encode_default(&model, variant);
        assert_eq!(sniff_variant(&mdl).unwrap(), variant);
        let decoded = decode_model(&mdl, Some(&mdx)).unwrap();
        // Dirt fields are defaults here, so the model survives every layout.
        assert_eq!(decoded, model, "variant {}", variant.name());
    }
}

#[test]
fn test_compressed_orientation_keys_survive_within_tolerance() {
    let model = fixture();
    let options = WriteOptions {
        compress_quaternions: true,
    };
    let (mdl, mdx) = encode_model(&model, Variant::TslPc, &options).unwrap();
    let decoded = decode_model(&mdl, Some(&mdx)).unwrap();

    let original = &model.animations[0].root.children[0].controllers[0];
    let roundtripped = &decoded.animations[0].root.children[0].controllers[0];
    assert_eq!(original.controller_type, ORIENTATION);
    assert_eq!(roundtripped.rows.len(), original.rows.len());
    for (a, b) in original.rows.iter().zip(&roundtripped.rows) {
        let qa = Quat::from_xyzw(a.values[0], a.values[1], a.values[2], a.values[3]).normalize();
        let qa = if qa.w < 0.0 { -qa } else { qa };
        let qb = Quat::from_xyzw(b.values[0], b.values[1], b.values[2], b.values[3]);
        assert!(qb.w >= 0.0);
        assert!(qa.dot(qb) > 0.999, "dot {}", qa.dot(qb));
    }
}

// =============================================================================
// STRUCTURE-STREAM PROPERTIES
// =============================================================================

#[test]
fn test_name_table_matches_visitation_order() {
    let model = fixture();
    let (mdl, _) = encode_default(&model, Variant::KotorPc);

    let table = (FILE_HEADER_SIZE + GEOMETRY_HEADER_SIZE + MODEL_HEADER_SIZE) as usize;
    let mut last_offset = 0u32;
    for (i, node) in model.iter_nodes().enumerate() {
        let entry = table + 4 * i;
        let offset = u32::from_le_bytes(mdl[entry..entry + 4].try_into().unwrap());
        assert!(offset > last_offset, "name offsets must increase in visit order");
        last_offset = offset;

        let start = FILE_HEADER_SIZE as usize + offset as usize;
        let len = mdl[start..].iter().position(|&b| b == 0).unwrap();
        let name = std::str::from_utf8(&mdl[start..start + len]).unwrap();
        assert_eq!(name, node.name);
    }
}

#[test]
fn test_redundant_count_mismatch_is_fatal() {
    let model = fixture();
    let (mut mdl, mdx) = encode_default(&model, Variant::KotorPc);

    // Second count of the name-table descriptor in the model header.
    let count2_at = (FILE_HEADER_SIZE + GEOMETRY_HEADER_SIZE + MODEL_HEADER_SIZE - 4) as usize;
    let count2 = u32::from_le_bytes(mdl[count2_at..count2_at + 4].try_into().unwrap());
    mdl[count2_at..count2_at + 4].copy_from_slice(&(count2 + 1).to_le_bytes());

    let err = decode_model(&mdl, Some(&mdx)).unwrap_err();
    assert!(
        matches!(err, Error::ArrayCountMismatch { count, count2, .. } if count + 1 == count2),
        "got {err:?}"
    );
}

#[test]
fn test_unknown_variant_is_fatal() {
    let model = fixture();
    let (mut mdl, mdx) = encode_default(&model, Variant::KotorPc);
    mdl[FILE_HEADER_SIZE as usize..FILE_HEADER_SIZE as usize + 4]
        .copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
    let err = decode_model(&mdl, Some(&mdx)).unwrap_err();
    assert!(matches!(err, Error::UnknownVariant { .. }), "got {err:?}");
}

#[test]
fn test_corrupt_sentinel_is_fatal() {
    let model = fixture();
    let (mut mdl, mdx) = encode_default(&model, Variant::KotorPc);
    mdl[0..4].copy_from_slice(&1u32.to_le_bytes());
    let err = decode_model(&mdl, Some(&mdx)).unwrap_err();
    assert!(
        matches!(err, Error::CorruptHeader { field: "sentinel", .. }),
        "got {err:?}"
    );
}

#[test]
fn test_missing_companion_stream_is_fatal() {
    let model = fixture();
    let (mdl, _) = encode_default(&model, Variant::KotorPc);
    let err = decode_model(&mdl, None).unwrap_err();
    assert!(matches!(err, Error::MissingCompanionStream), "got {err:?}");
}

#[test]
fn test_truncated_stream_is_out_of_bounds() {
    let model = fixture();
    let (mdl, mdx) = encode_default(&model, Variant::KotorPc);
    // Chop the tail but keep the header's size field consistent.
    let cut = mdl.len() - 64;
    let mut truncated = mdl[..cut].to_vec();
    let data_size = (cut - FILE_HEADER_SIZE as usize) as u32;
    truncated[4..8].copy_from_slice(&data_size.to_le_bytes());
    let err = decode_model(&truncated, Some(&mdx)).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }), "got {err:?}");
}

// =============================================================================
// SKIN + ASCII SURFACE
// =============================================================================

#[test]
fn test_skin_bone_tables_resolved_on_decode() {
    let model = fixture();
    let (mdl, mdx) = encode_default(&model, Variant::KotorPc);
    let decoded = decode_model(&mdl, Some(&mdx)).unwrap();

    let arm = decoded.node_by_name("arm").unwrap();
    let NodePayload::Mesh(payload) = &arm.payload else {
        panic!("arm is a skin node");
    };
    let MeshKind::Skin(skin) = &payload.kind else {
        panic!("arm is a skin node");
    };
    // Slot 1 -> torso (serial 1), slot 2 -> tip (serial 2); slot 0 unused.
    assert_eq!(skin.bone_serial, [0, 1, 2]);
    assert_eq!(skin.bone_node_id, [0, 1, 9]);
}

#[test]
fn test_ascii_export_names_every_node() {
    let model = fixture();
    let text = to_ascii(&model);
    for node in model.iter_nodes() {
        assert!(
            text.contains(&format!(" {}", node.name)),
            "missing node {}",
            node.name
        );
    }
    assert!(text.contains("newanim wave droid"));
    assert!(text.contains("orientationkey 2"));
    assert!(text.contains("positionbezierkey 2"));
    assert!(text.contains("event 0.5 snd_footstep"));
}
