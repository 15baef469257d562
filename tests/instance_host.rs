use linkdeploy::{
    state::state_file_for, DeployConfig, Deployer, Host, InstanceHost, InstanceOptions, LinkMode,
    RootCategory, StateStore, VirtualTreeWalker,
};
use std::{
    fs,
    path::Path,
    sync::{atomic::AtomicBool, mpsc, Arc},
};
use tempfile::tempdir;

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn instance(base: &Path) -> InstanceOptions {
    let root = base.join("instance");
    let game = base.join("game");
    write(
        &root.join("ModOrganizer.ini"),
        &format!(
            "[General]\n\
             gameName=Skyrim Special Edition\n\
             gamePath=@ByteArray({})\n\
             selected_profile=@ByteArray(Default)\n",
            game.display()
        ),
    );
    write(
        &root.join("profiles/Default/modlist.txt"),
        "# This file was automatically generated by Mod Organizer.\n+High\n+Low\n-Off\n",
    );
    write(&root.join("mods/High/shared.esp"), "high");
    write(&root.join("mods/High/meshes/plate.nif"), "nif");
    write(&root.join("mods/High/old.esp.mohidden"), "hidden");
    write(&root.join("mods/Low/shared.esp"), "low");
    write(&root.join("mods/Low/low.esp"), "low only");
    write(&root.join("mods/Low/patch.esp"), "low patch");
    write(&root.join("mods/Off/off.esp"), "disabled");
    write(&root.join("overwrite/patch.esp"), "generated");
    write(&game.join("Data/Skyrim.esm"), "base game");

    InstanceOptions {
        instance_dir: root,
        profile: None,
        game_dir: None,
        data_dir_name: "Data".to_string(),
    }
}

#[test]
fn overlay_follows_mod_priority() {
    let base = tempdir().unwrap();
    let host = InstanceHost::open(instance(base.path())).unwrap();

    assert_eq!(host.profile(), "Default");
    assert_eq!(host.roots().game, base.path().join("game"));
    assert_eq!(host.resolve_origins("shared.esp"), ["High", "Low"]);
    assert_eq!(host.resolve_origins("patch.esp"), ["overwrite", "Low"]);
    assert!(host.resolve_origins("off.esp").is_empty());

    let mut files: Vec<(String, RootCategory)> = VirtualTreeWalker::new(&host)
        .map(|file| (file.path, file.category))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        files,
        [
            ("Skyrim.esm".to_string(), RootCategory::Data),
            ("low.esp".to_string(), RootCategory::Mods),
            ("meshes/plate.nif".to_string(), RootCategory::Mods),
            ("patch.esp".to_string(), RootCategory::Overwrite),
            ("shared.esp".to_string(), RootCategory::Mods),
        ]
    );
}

#[test]
fn deploys_winning_files_into_game_data() {
    let base = tempdir().unwrap();
    let host = InstanceHost::open(instance(base.path())).unwrap();
    let state = state_file_for(&base.path().join("state"), &host.roots().data);
    let config = DeployConfig {
        workers: Some(1),
        ..DeployConfig::default()
    };
    let deployer = Deployer::new(Arc::new(host), config, state).unwrap();

    let (sender, _receiver) = mpsc::channel();
    let summary = deployer.run(None, Arc::new(AtomicBool::new(false)), sender);

    assert_eq!(summary.linked, 4);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    let data = base.path().join("game/Data");
    assert_eq!(fs::read_to_string(data.join("shared.esp")).unwrap(), "high");
    assert_eq!(fs::read_to_string(data.join("patch.esp")).unwrap(), "generated");
    assert_eq!(fs::read_to_string(data.join("meshes/plate.nif")).unwrap(), "nif");
    assert_eq!(fs::read_to_string(data.join("Skyrim.esm")).unwrap(), "base game");
    assert!(!data.join("off.esp").exists());
    assert!(!data.join("old.esp.mohidden").exists());
}

#[test]
fn missing_game_path_is_an_error() {
    let base = tempdir().unwrap();
    let root = base.path().join("instance");
    write(&root.join("profiles/Default/modlist.txt"), "+High\n");
    let result = InstanceHost::open(InstanceOptions {
        instance_dir: root,
        profile: None,
        game_dir: None,
        data_dir_name: "Data".to_string(),
    });
    assert!(result.is_err());
}

#[test]
fn prune_removes_links_of_a_disabled_mod() {
    let base = tempdir().unwrap();
    let root = base.path().join("instance");
    let game = base.path().join("game");
    write(
        &root.join("ModOrganizer.ini"),
        &format!("[General]\ngamePath={}\n", game.display()),
    );
    let modlist = root.join("profiles/Default/modlist.txt");
    write(&modlist, "+ArmorMod\n");
    write(&root.join("mods/ArmorMod/armor/helm.esp"), "helm");
    write(&game.join("Data/Skyrim.esm"), "base game");
    let options = InstanceOptions {
        instance_dir: root,
        profile: None,
        game_dir: None,
        data_dir_name: "Data".to_string(),
    };
    let state = state_file_for(&base.path().join("state"), &game.join("Data"));
    let config = DeployConfig {
        prune_stale: true,
        workers: Some(1),
        ..DeployConfig::default()
    };
    let cycle = |options: InstanceOptions| {
        let host = InstanceHost::open(options).unwrap();
        let deployer = Deployer::new(Arc::new(host), config.clone(), state.clone()).unwrap();
        let (sender, _receiver) = mpsc::channel();
        deployer.run(None, Arc::new(AtomicBool::new(false)), sender)
    };

    let first = cycle(options.clone());
    assert_eq!(first.linked, 1);
    let helm = game.join("Data/armor/helm.esp");
    assert!(helm.exists());

    // The deployed link now shows through the data layer of the overlay.
    write(&modlist, "-ArmorMod\n");
    let second = cycle(options);
    assert_eq!(second.removed, 1);
    assert_eq!(second.failed, 0);
    assert!(!helm.exists());
    assert!(game.join("Data/Skyrim.esm").exists());
    assert!(StateStore::load(&state, LinkMode::Hardlink).is_empty());
}
