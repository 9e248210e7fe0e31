use std::collections::HashSet;
use std::fs;

use serde_json::json;
use tessera::{
    LayerPair, PairedTilingSetQueue, PriorityBin, RasterTilePriorityQueue, RasterTraversal, Scene,
    SceneFile, Tile, TileResolution, TreePriority, WhichTree,
};

const ALL_MODES: [TreePriority; 3] = [
    TreePriority::SamePriorityForBothTrees,
    TreePriority::SmoothnessTakesPriority,
    TreePriority::NewContentTakesPriority,
];

fn load(name: &str) -> Scene {
    Scene::from_path(format!("tests/data/scenes/{name}")).unwrap()
}

fn raster_order(scene: &Scene, tree_priority: TreePriority) -> Vec<u64> {
    let pairs = scene.layer_pairs();
    let mut queue = RasterTilePriorityQueue::new();
    queue.build(&pairs, tree_priority);
    queue.map(|tile| tile.id().0).collect()
}

#[test]
fn load_and_validate_scene_fixtures() {
    for entry in fs::read_dir("tests/data/scenes").unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let file: SceneFile = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        file.validate().unwrap();
        Scene::from_path(&path).unwrap();
    }
}

#[test]
fn empty_build_is_empty() {
    let scene = Scene::from_json_str(r#"{ "layers": [] }"#).unwrap();
    let pairs = scene.layer_pairs();

    let mut queue = RasterTilePriorityQueue::new();
    queue.build(&[], TreePriority::SmoothnessTakesPriority);
    assert!(queue.is_empty());

    queue.build(&pairs, TreePriority::NewContentTakesPriority);
    assert!(queue.is_empty());
}

#[test]
fn every_distinct_tile_is_popped_exactly_once() {
    for name in ["smoothness_mixed.json", "shared_listed.json", "new_content.json"] {
        let scene = load(name);
        for mode in ALL_MODES {
            let pairs = scene.layer_pairs();
            let mut queue = RasterTilePriorityQueue::new();
            queue.build(&pairs, mode);

            let mut seen = HashSet::new();
            for _ in 0..scene.distinct_tile_count() {
                assert!(!queue.is_empty(), "{name} {mode:?} ran dry early");
                assert!(seen.insert(queue.top().id()), "{name} {mode:?} repeated a tile");
                queue.pop();
            }
            assert!(queue.is_empty(), "{name} {mode:?} has leftovers");
        }
    }
}

#[test]
fn smoothness_fixture_order() {
    let scene = load("smoothness_mixed.json");
    assert_eq!(
        raster_order(&scene, TreePriority::SmoothnessTakesPriority),
        vec![12, 1, 11, 10, 2, 4, 3]
    );
}

#[test]
fn new_content_serves_pending_while_both_trees_have_work() {
    let scene = load("new_content.json");
    assert_eq!(
        raster_order(&scene, TreePriority::NewContentTakesPriority),
        vec![42, 41, 40]
    );
}

#[test]
fn shared_tile_once_regardless_of_traversal() {
    let text = fs::read_to_string("tests/data/scenes/shared_listed.json").unwrap();
    let listed: SceneFile = serde_json::from_str(&text).unwrap();

    let mut sorted = listed.clone();
    for layer in &mut sorted.layers {
        layer.traversal = RasterTraversal::Priority;
        layer.pending_order = None;
    }

    for file in [listed, sorted] {
        let scene = file.into_scene().unwrap();
        for mode in ALL_MODES {
            let order = raster_order(&scene, mode);
            let unique: HashSet<u64> = order.iter().copied().collect();
            assert_eq!(order.len(), unique.len(), "{mode:?}: {order:?}");
            assert_eq!(unique, HashSet::from([21, 22, 23, 24, 30, 31]));
        }
    }
}

#[test]
fn paired_queue_prefers_pending_now_over_active_eventually() {
    let scene = Scene::from_json_str(
        &json!({
            "layers": [{
                "id": 1,
                "tiles": [
                    { "id": 50, "active": { "priority_bin": "eventually", "resolution": "high", "distance_to_visible": 100.0 } },
                    { "id": 51, "pending": { "priority_bin": "now", "resolution": "high", "distance_to_visible": 0.0 } }
                ]
            }]
        })
        .to_string(),
    )
    .unwrap();
    let pairs: Vec<LayerPair<'_>> = scene.layer_pairs();
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].active.is_some() && pairs[0].pending.is_some());

    let mut queue = PairedTilingSetQueue::new(pairs[0], TreePriority::SmoothnessTakesPriority);
    assert_eq!(
        queue.next_tile_iterator_tree(TreePriority::SmoothnessTakesPriority),
        WhichTree::Pending
    );
    assert_eq!(queue.top(TreePriority::SmoothnessTakesPriority).id().0, 51);
    queue.pop(TreePriority::SmoothnessTakesPriority);
    assert_eq!(queue.top(TreePriority::SmoothnessTakesPriority).id().0, 50);
    queue.pop(TreePriority::SmoothnessTakesPriority);
    assert!(queue.is_empty());
}

#[test]
fn smoothness_lifts_pending_now_within_eventually_bin() {
    // Layer 1's active candidate is closer, but layer 2's tile is needed for activation.
    let scene = Scene::from_json_str(
        &json!({
            "layers": [
                {
                    "id": 1,
                    "tiles": [
                        { "id": 1, "active": { "priority_bin": "eventually", "resolution": "high", "distance_to_visible": 10.0 } }
                    ]
                },
                {
                    "id": 2,
                    "tiles": [{
                        "id": 2,
                        "active": { "priority_bin": "eventually", "resolution": "high", "distance_to_visible": 500.0 },
                        "pending": { "priority_bin": "now", "resolution": "high", "distance_to_visible": 0.0 }
                    }]
                }
            ]
        })
        .to_string(),
    )
    .unwrap();
    assert_eq!(
        raster_order(&scene, TreePriority::SmoothnessTakesPriority),
        vec![2, 1]
    );
}

#[test]
fn non_ideal_tiles_trail_their_bin() {
    let scene = load("smoothness_mixed.json");
    for mode in [
        TreePriority::SmoothnessTakesPriority,
        TreePriority::SamePriorityForBothTrees,
    ] {
        let order = raster_order(&scene, mode);
        let at = |id: u64| order.iter().position(|&t| t == id).unwrap();
        assert!(at(11) < at(10), "{mode:?}: {order:?}");
    }
}

/// Small deterministic generator so the ordering check covers more than hand-written scenes.
struct Lcg(u64);

impl Lcg {
    fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next_u64() % items.len() as u64) as usize]
    }
}

fn resolution_rank(resolution: TileResolution, prioritize_low_res: bool) -> u8 {
    match (resolution, prioritize_low_res) {
        (TileResolution::Low, true) | (TileResolution::High, false) => 0,
        (TileResolution::High, true) | (TileResolution::Low, false) => 1,
        (TileResolution::NonIdeal, _) => 2,
    }
}

#[test]
fn active_only_stream_is_non_increasing() {
    let bins = [PriorityBin::Now, PriorityBin::Soon, PriorityBin::Eventually];
    let resolutions = [
        TileResolution::High,
        TileResolution::Low,
        TileResolution::NonIdeal,
    ];
    let mut rng = Lcg(7);

    for round in 0..20 {
        let mut next_id = 1;
        let layers: Vec<_> = (1..=4)
            .map(|layer| {
                let tiles: Vec<_> = (0..6)
                    .map(|_| {
                        next_id += 1;
                        json!({
                            "id": next_id,
                            "active": {
                                "priority_bin": rng.pick(&bins),
                                "resolution": rng.pick(&resolutions),
                                "distance_to_visible": (rng.next_u64() % 1000) as f32,
                            }
                        })
                    })
                    .collect();
                json!({ "id": layer, "tiles": tiles })
            })
            .collect();
        let scene = Scene::from_json_str(&json!({ "layers": layers }).to_string()).unwrap();

        for mode in [
            TreePriority::SmoothnessTakesPriority,
            TreePriority::SamePriorityForBothTrees,
        ] {
            let low_res_first = mode.prioritizes_low_res();
            let pairs = scene.layer_pairs();
            let mut queue = RasterTilePriorityQueue::new();
            queue.build(&pairs, mode);
            let keys: Vec<_> = queue
                .map(|tile| {
                    let p = tile.priority(WhichTree::Active);
                    (
                        p.priority_bin,
                        resolution_rank(p.resolution, low_res_first),
                        p.distance_to_visible,
                    )
                })
                .collect();
            assert_eq!(keys.len(), 24);
            for pair in keys.windows(2) {
                assert!(
                    pair[0] <= pair[1],
                    "round {round} {mode:?}: {:?} before {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }
}

/// Sort key of a tile under `mode`: smaller is more urgent. Pending NOW tiles in the active
/// EVENTUALLY bin all tie ahead of the rest of that bin in smoothness mode.
fn raster_key(tile: &Tile, mode: TreePriority) -> (PriorityBin, u8, u8, f32) {
    let p = tile.priority_for_tree_priority(mode);
    let low_res_first = mode.prioritizes_low_res();
    if low_res_first && p.priority_bin == PriorityBin::Eventually {
        if tile.priority(WhichTree::Pending).priority_bin == PriorityBin::Now {
            return (p.priority_bin, 0, 0, 0.0);
        }
        return (
            p.priority_bin,
            1,
            resolution_rank(p.resolution, low_res_first),
            p.distance_to_visible,
        );
    }
    (
        p.priority_bin,
        0,
        resolution_rank(p.resolution, low_res_first),
        p.distance_to_visible,
    )
}

fn random_priority(rng: &mut Lcg) -> serde_json::Value {
    json!({
        "priority_bin": rng.pick(&[PriorityBin::Now, PriorityBin::Soon, PriorityBin::Eventually]),
        "resolution": rng.pick(&[
            TileResolution::High,
            TileResolution::Low,
            TileResolution::NonIdeal,
        ]),
        "distance_to_visible": (rng.next_u64() % 1000) as f32,
    })
}

#[test]
fn two_tree_stream_emits_each_tile_once_from_the_best_layer() {
    let mut rng = Lcg(19);

    for round in 0..30 {
        let mut next_id = 0;
        let layers: Vec<_> = (1..=4)
            .map(|layer| {
                let tiles: Vec<_> = (0..8)
                    .map(|_| {
                        next_id += 1;
                        match rng.next_u64() % 3 {
                            0 => json!({ "id": next_id, "active": random_priority(&mut rng) }),
                            1 => json!({ "id": next_id, "pending": random_priority(&mut rng) }),
                            _ => json!({
                                "id": next_id,
                                "active": random_priority(&mut rng),
                                "pending": random_priority(&mut rng),
                            }),
                        }
                    })
                    .collect();
                json!({ "id": layer, "tiles": tiles })
            })
            .collect();
        let scene = Scene::from_json_str(&json!({ "layers": layers }).to_string()).unwrap();
        assert_eq!(scene.distinct_tile_count(), 32);

        for mode in ALL_MODES {
            let pairs = scene.layer_pairs();
            let mut per_layer: Vec<_> = pairs
                .iter()
                .map(|&pair| PairedTilingSetQueue::new(pair, mode))
                .collect();
            let mut queue = RasterTilePriorityQueue::new();
            queue.build(&pairs, mode);

            let mut seen = HashSet::new();
            while !queue.is_empty() {
                let tile = queue.top();
                let id = tile.id();
                assert!(seen.insert(id), "round {round} {mode:?}: {id:?} emitted twice");

                let from = per_layer
                    .iter()
                    .position(|q| !q.is_empty() && q.top(mode).id() == id)
                    .unwrap_or_else(|| {
                        panic!("round {round} {mode:?}: {id:?} is not the front of any layer")
                    });
                let key = raster_key(tile, mode);
                for (i, other) in per_layer.iter().enumerate() {
                    if i == from || other.is_empty() {
                        continue;
                    }
                    let other_key = raster_key(other.top(mode), mode);
                    assert!(
                        key <= other_key,
                        "round {round} {mode:?}: {id:?} {key:?} came before a front tile {:?} {other_key:?}",
                        other.top(mode).id()
                    );
                }

                per_layer[from].pop(mode);
                queue.pop();
            }

            assert_eq!(seen.len(), scene.distinct_tile_count(), "round {round} {mode:?}");
            assert!(per_layer.iter().all(|q| q.is_empty()));
        }
    }
}
