use std::path::PathBuf;

use zelview_core::gfx::texture::TileCache;
use zelview_core::gfx::{DrawOp, NullBackend};
use zelview_core::scene::{read_main_scene, read_scene, Headers, Mesh};
use zelview_core::{Rom, Vfs};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let list_only = args.iter().any(|a| a == "--list");
    let scene_arg = args
        .iter()
        .position(|a| a == "--scene")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let path = args
        .iter()
        .skip(1)
        .enumerate()
        .find(|(i, a)| {
            !a.starts_with("--")
                && !matches!(args.get(*i), Some(prev) if prev == "--scene")
        })
        .map(|(_, a)| PathBuf::from(a))
        .unwrap_or_else(|| {
            eprintln!("Usage: zelview [--list] [--scene <hex pStart>] <file>");
            std::process::exit(1);
        });

    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    log::info!("Read {} bytes from {}", data.len(), path.display());

    if data.starts_with(zelview_core::vfs::MAGIC) {
        run_container(data, list_only);
    } else {
        run_rom(data, list_only, scene_arg);
    }
}

fn run_container(data: Vec<u8>, list_only: bool) {
    let vfs = match Vfs::parse(data) {
        Ok(vfs) => vfs,
        Err(e) => {
            eprintln!("Failed to parse container: {}", e);
            std::process::exit(1);
        }
    };

    if list_only {
        for entry in vfs.entries() {
            println!(
                "{:<48} p {:#010X}..{:#010X}  v {:#010X}..{:#010X}",
                entry.filename, entry.p_start, entry.p_end, entry.v_start, entry.v_end
            );
        }
        return;
    }

    println!("Scene file: {}", vfs.main_entry().filename);
    let mut cache = TileCache::new();
    let mut backend = NullBackend::default();
    let headers = read_main_scene(&vfs, &mut cache, &mut backend);
    print_summary(&headers, cache.len());
}

fn run_rom(data: Vec<u8>, list_only: bool, scene_arg: Option<String>) {
    let rom = match Rom::parse(data) {
        Ok(rom) => rom,
        Err(e) => {
            eprintln!("Failed to parse ROM: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "ROM \"{}\" ({} v{}), built {}",
        rom.title, rom.game_id, rom.version, rom.build_date
    );

    if list_only {
        for entry in rom.dma_table().iter().filter(|e| e.valid) {
            println!(
                "{:<32} {:?}  p {:#010X}..{:#010X}",
                entry.filename, entry.kind, entry.p_start, entry.p_end
            );
        }
        return;
    }

    // Default to the first known scene present in this ROM's table.
    let p_start = match scene_arg {
        Some(s) => match u32::from_str_radix(s.trim_start_matches("0x"), 16) {
            Ok(p) => p,
            Err(_) => {
                eprintln!("--scene expects a hex pStart, got \"{}\"", s);
                std::process::exit(1);
            }
        },
        None => match Rom::scene_table()
            .iter()
            .find(|(p, _)| rom.lookup_by_p_start(*p).is_some())
        {
            Some((p, name)) => {
                println!("Scene: {}", name);
                *p
            }
            None => {
                eprintln!("No known scene found in this ROM");
                std::process::exit(1);
            }
        },
    };

    let Some(entry) = rom.lookup_by_p_start(p_start) else {
        eprintln!("No file starts at {:#010X}", p_start);
        std::process::exit(1);
    };
    let bank = rom.bank_for(entry);

    let mut cache = TileCache::new();
    let mut backend = NullBackend::default();
    let headers = read_scene(&rom, bank, &mut cache, &mut backend);
    print_summary(&headers, cache.len());
}

fn mesh_stats(mesh: &Mesh) -> (usize, usize) {
    let ops = |lists: &[Vec<DrawOp>]| lists.iter().map(Vec::len).sum::<usize>();
    (
        mesh.opaque.len() + mesh.transparent.len(),
        ops(&mesh.opaque) + ops(&mesh.transparent),
    )
}

fn print_headers(headers: &Headers, label: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    let (lists, ops) = headers
        .mesh
        .as_ref()
        .map(mesh_stats)
        .unwrap_or((0, 0));
    let collision = match &headers.collision {
        Some(c) => format!(
            ", collision: {} verts / {} polys / {} waters",
            c.verts.len(),
            c.polys.len(),
            c.waters.len()
        ),
        None => String::new(),
    };
    println!(
        "{}{}: {} display lists, {} draw ops{}",
        indent, label, lists, ops, collision
    );
    for (i, room) in headers.rooms.iter().enumerate() {
        print_headers(room, &format!("room {}", i), depth + 1);
    }
}

fn print_summary(headers: &Headers, textures: usize) {
    print_headers(headers, "scene", 0);
    println!("{} textures decoded", textures);
}
