use glam::Vec3;

const SH_C0: f32 = 0.2820947917738781;

pub fn sh_to_channel(sh: f32) -> f32 {
    sh * SH_C0 + 0.5
}

/// Color of the zeroth spherical harmonic band.
pub fn sh_to_rgb(sh: Vec3) -> Vec3 {
    glam::vec3(
        sh_to_channel(sh.x),
        sh_to_channel(sh.y),
        sh_to_channel(sh.z),
    )
}
