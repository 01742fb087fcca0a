macro_rules! worktree {
    ($($path:literal => $content:expr),* $(,)?) => {{
        let tempdir = ::tempfile::tempdir().unwrap();
        $({
            let path = tempdir.path().join($path);
            ::std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            ::std::fs::write(path, $content).unwrap();
        })*
        tempdir
    }};
}

pub(crate) use worktree;
